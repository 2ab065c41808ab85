use lcus_relay_core::device::{
    shared_device, AsciiStatusDevice, DeviceProtocol, RelayDevice, SharedDevice,
};
use lcus_relay_core::protocol::{RelayError, RelayState, SharedTransport, Transport};
use lcus_relay_core::sequencer::{LogicalStatus, PowerSequencer, SequenceAction, SequencerConfig};
use lcus_relay_core::sim::SimulatedBoard;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const POWER_ON: [u8; 4] = [0xA0, 0x01, 0x01, 0xA2];
const POWER_OFF: [u8; 4] = [0xA0, 0x01, 0x00, 0xA1];
const USB_ON: [u8; 4] = [0xA0, 0x02, 0x01, 0xA3];
const USB_OFF: [u8; 4] = [0xA0, 0x02, 0x00, 0xA2];

fn device(board: &SimulatedBoard) -> SharedDevice {
    shared_device(
        DeviceProtocol::Ascii,
        SharedTransport::new(board.clone()),
        Some(Duration::ZERO),
    )
    .unwrap()
}

fn fast_config() -> SequencerConfig {
    SequencerConfig {
        power_to_usb_delay: Duration::from_millis(40),
        inter_command_delay: Duration::from_millis(10),
        ..SequencerConfig::default()
    }
}

fn sequencer(board: &SimulatedBoard, config: SequencerConfig) -> PowerSequencer {
    PowerSequencer::new(device(board), config)
}

fn frames(board: &SimulatedBoard) -> Vec<Vec<u8>> {
    board.written()
}

/// Board that answers every status query with the same lines
struct FixedStatus {
    reply: &'static [u8],
    pending: &'static [u8],
}

impl Transport for FixedStatus {
    fn write_all(&mut self, _data: &[u8]) -> Result<(), RelayError> {
        self.pending = self.reply;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RelayError> {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending = &self.pending[n..];
        Ok(n)
    }

    fn reset_input_buffer(&mut self) -> Result<(), RelayError> {
        self.pending = &[];
        Ok(())
    }
}

fn fixed_status_sequencer(reply: &'static [u8]) -> (PowerSequencer, SharedDevice) {
    let device: SharedDevice = Arc::new(Mutex::new(
        AsciiStatusDevice::new(SharedTransport::new(FixedStatus { reply, pending: &[] }))
            .with_settle_delay(Duration::ZERO),
    ));
    (PowerSequencer::new(device.clone(), fast_config()), device)
}

#[test]
fn test_sequence_on_order_and_timing() {
    let board = SimulatedBoard::ascii(2);
    let config = fast_config();
    let seq = sequencer(&board, config.clone());

    seq.sequence_on().unwrap();

    assert_eq!(frames(&board), vec![USB_OFF.to_vec(), POWER_ON.to_vec(), USB_ON.to_vec()]);

    let writes = board.writes();
    assert!(writes[1].at.duration_since(writes[0].at) >= config.inter_command_delay);
    assert!(writes[2].at.duration_since(writes[1].at) >= config.power_to_usb_delay);

    assert_eq!(board.relays(), vec![RelayState::Open, RelayState::Open]);
}

#[test]
fn test_sequence_off_order() {
    let board = SimulatedBoard::ascii(2);
    let config = fast_config();
    let seq = sequencer(&board, config.clone());

    seq.sequence_off().unwrap();

    assert_eq!(frames(&board), vec![POWER_OFF.to_vec(), USB_OFF.to_vec()]);
    let writes = board.writes();
    assert!(writes[1].at.duration_since(writes[0].at) >= config.inter_command_delay);
}

#[test]
fn test_sequence_reset_order() {
    let board = SimulatedBoard::ascii(2);
    let config = fast_config();
    let seq = sequencer(&board, config.clone());

    seq.run(SequenceAction::Reset).unwrap();

    assert_eq!(
        frames(&board),
        vec![POWER_OFF.to_vec(), USB_OFF.to_vec(), POWER_ON.to_vec(), USB_ON.to_vec()]
    );
    let writes = board.writes();
    assert!(writes[3].at.duration_since(writes[2].at) >= config.power_to_usb_delay);
}

#[test]
fn test_inverted_polarity() {
    let board = SimulatedBoard::ascii(2);
    let config = SequencerConfig {
        invert_power: true,
        invert_usb: true,
        ..fast_config()
    };
    let seq = sequencer(&board, config);

    seq.sequence_on().unwrap();

    // Every logical step drives the opposite physical state
    assert_eq!(frames(&board), vec![USB_ON.to_vec(), POWER_OFF.to_vec(), USB_OFF.to_vec()]);
    assert_eq!(
        seq.read_logical_status().unwrap(),
        LogicalStatus {
            power: Some(true),
            usb: Some(true)
        }
    );
}

#[test]
fn test_swapped_channels() {
    let board = SimulatedBoard::ascii(2);
    let config = SequencerConfig {
        power_channel: 1,
        usb_channel: 0,
        ..fast_config()
    };
    let seq = sequencer(&board, config);

    seq.set_power(true).unwrap();
    assert_eq!(frames(&board), vec![USB_ON.to_vec()]);
    assert_eq!(board.relay(1), Some(RelayState::Open));
}

#[test]
fn test_logical_status() {
    let board = SimulatedBoard::ascii(2);
    board.set_relay(0, RelayState::Open);
    let config = SequencerConfig {
        invert_usb: true,
        ..fast_config()
    };
    let seq = sequencer(&board, config);

    let status = seq.read_logical_status().unwrap();
    assert_eq!(
        status,
        LogicalStatus {
            power: Some(true),
            usb: Some(true)
        }
    );
    assert_eq!(status.to_string(), "power ON, usb ON");

    board.set_relay(1, RelayState::Open);
    assert_eq!(seq.read_logical_status().unwrap().usb, Some(false));
}

#[test]
fn test_logical_status_unknown_channel() {
    let board = SimulatedBoard::ascii(1);
    let seq = sequencer(&board, fast_config());

    let status = seq.read_logical_status().unwrap();
    assert_eq!(status.power, Some(false));
    assert_eq!(status.usb, None);
    assert_eq!(status.to_string(), "power OFF, usb UNKNOWN");
}

#[test]
fn test_logical_status_of_skipped_channel_is_unknown() {
    let (seq, device) = fixed_status_sequencer(b"CH2: ON\r\n");

    let status = seq.read_logical_status().unwrap();
    assert_eq!(
        status,
        LogicalStatus {
            power: None,
            usb: Some(true)
        }
    );
    assert_eq!(status.to_string(), "power UNKNOWN, usb ON");

    let dev = device.lock().unwrap();
    assert_eq!(dev.cached_state(1).unwrap(), RelayState::Open);
    assert_eq!(dev.reported_state(0), None);
}

#[test]
fn test_duplicated_status_line_is_rejected() {
    let (seq, _device) = fixed_status_sequencer(b"CH1: ON\r\nCH1: OFF\r\n");
    assert!(matches!(
        seq.read_logical_status(),
        Err(RelayError::UnrecognizedResponse(_))
    ));
}

#[test]
fn test_concurrent_sequences_do_not_interleave() {
    let board = SimulatedBoard::ascii(2);
    let seq = Arc::new(sequencer(&board, fast_config()));

    let on = {
        let seq = Arc::clone(&seq);
        std::thread::spawn(move || seq.run(SequenceAction::On))
    };
    let off = {
        let seq = Arc::clone(&seq);
        std::thread::spawn(move || seq.run(SequenceAction::Off))
    };
    on.join().unwrap().unwrap();
    off.join().unwrap().unwrap();

    let on_frames = vec![USB_OFF.to_vec(), POWER_ON.to_vec(), USB_ON.to_vec()];
    let off_frames = vec![POWER_OFF.to_vec(), USB_OFF.to_vec()];

    let written = frames(&board);
    assert_eq!(written.len(), 5);
    let on_first = [on_frames.clone(), off_frames.clone()].concat();
    let off_first = [off_frames, on_frames].concat();
    assert!(written == on_first || written == off_first, "{:02x?}", written);
}

#[test]
fn test_failed_step_aborts_sequence() {
    let board = SimulatedBoard::ascii(2);
    let config = SequencerConfig {
        power_channel: 3,
        ..fast_config()
    };
    let seq = sequencer(&board, config);

    // Learn the board size so channel 3 is out of range
    assert_eq!(seq.device().lock().unwrap().channel_count().unwrap(), 2);
    board.clear_writes();

    let err = seq.sequence_on().unwrap_err();
    assert!(matches!(err, RelayError::InvalidChannel { channel: 3, limit: 2 }));
    assert_eq!(frames(&board), vec![USB_OFF.to_vec()]);
}

#[test]
fn test_disconnected_board_fails_sequence() {
    let board = SimulatedBoard::ascii(2);
    let seq = sequencer(&board, fast_config());
    board.disconnect();

    assert!(seq.run(SequenceAction::Off).unwrap_err().is_transport());
    assert!(seq.read_logical_status().unwrap_err().is_transport());
    assert!(board.written().is_empty());
}

#[test]
fn test_feedback_board_sequence() {
    let board = SimulatedBoard::feedback(2);
    let device = shared_device(
        DeviceProtocol::Feedback,
        SharedTransport::new(board.clone()),
        Some(Duration::ZERO),
    )
    .unwrap();
    let seq = PowerSequencer::new(device, fast_config());

    seq.sequence_on().unwrap();
    assert_eq!(frames(&board), vec![USB_OFF.to_vec(), POWER_ON.to_vec(), USB_ON.to_vec()]);
    assert_eq!(
        seq.read_logical_status().unwrap(),
        LogicalStatus {
            power: Some(true),
            usb: Some(true)
        }
    );
}
