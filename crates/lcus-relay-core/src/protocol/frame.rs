//! Frame encoding/decoding
//!
//! Command frame format:
//! - 1 byte: start marker (always 0xA0)
//! - 1 byte: channel number (1-based)
//! - 1 byte: op-code
//! - 1 byte: checksum (sum of the first three bytes, truncated to 8 bits)
//!
//! Feedback replies use the same layout with the relay state in place of the op-code.
//! Status replies are either raw state bytes or ASCII lines such as `CH1: ON`.

use regex::Regex;
use std::sync::OnceLock;

use super::{OpCode, RelayError, RelayState};

/// First byte of every command and feedback frame
pub const START_MARKER: u8 = 0xA0;

/// Size of a command or feedback frame
pub const FRAME_LEN: usize = 4;

/// Status query
pub const QUERY_STATUS: [u8; 1] = [0xFF];

/// Status query as sent by the older driver, with a trailing CR/LF
pub const LEGACY_QUERY_STATUS: [u8; 3] = [0xFF, 0x0D, 0x0A];

/// Sum of `bytes`, truncated to 8 bits
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// A command frame addressed to one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Channel number (1-based)
    pub channel: u8,
    /// Operation
    pub op: OpCode,
}

impl CommandFrame {
    /// Create a frame for a 1-based channel number
    pub fn new(channel: usize, op: OpCode) -> Result<Self, RelayError> {
        let channel = u8::try_from(channel)
            .ok()
            .filter(|c| *c != 0)
            .ok_or(RelayError::InvalidChannel {
                channel,
                limit: u8::MAX as usize,
            })?;
        Ok(Self { channel, op })
    }

    /// Create a frame for a 0-based channel index
    pub fn for_index(index: usize, op: OpCode) -> Result<Self, RelayError> {
        Self::new(index.saturating_add(1), op)
    }

    /// Truncated sum of the first three bytes
    pub fn checksum(&self) -> u8 {
        checksum(&[START_MARKER, self.channel, self.op.byte()])
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        [START_MARKER, self.channel, self.op.byte(), self.checksum()]
    }
}

/// Encode a command for a 1-based channel
pub fn encode_command(channel: usize, op: OpCode) -> Result<[u8; FRAME_LEN], RelayError> {
    CommandFrame::new(channel, op).map(|frame| frame.to_bytes())
}

/// A feedback reply that passed its integrity checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackFrame {
    /// Start byte as received
    pub start: u8,
    /// Channel number (1-based)
    pub channel: u8,
    /// Raw state byte
    pub state: u8,
}

impl FeedbackFrame {
    /// Validate channel and checksum of a reply; the start marker is not enforced
    pub fn parse(data: &[u8], expected_channel: u8) -> Result<Self, RelayError> {
        if data.len() < FRAME_LEN {
            return Err(RelayError::IncompleteResponse {
                expected: FRAME_LEN,
                actual: data.len(),
            });
        }

        let (start, channel, state, received) = (data[0], data[1], data[2], data[3]);

        if channel != expected_channel {
            return Err(RelayError::ChannelMismatch {
                expected: expected_channel,
                actual: channel,
            });
        }

        let expected = checksum(&data[..3]);
        if received != expected {
            return Err(RelayError::ChecksumError {
                expected,
                actual: received,
            });
        }

        Ok(Self {
            start,
            channel,
            state,
        })
    }

    /// Like [`FeedbackFrame::parse`], but also requires the 0xA0 start marker
    pub fn parse_strict(data: &[u8], expected_channel: u8) -> Result<Self, RelayError> {
        let frame = Self::parse(data, expected_channel)?;
        if frame.start != START_MARKER {
            return Err(RelayError::UnrecognizedResponse(format!(
                "feedback frame starts with {:#04x}, expected {:#04x}",
                frame.start, START_MARKER
            )));
        }
        Ok(frame)
    }

    /// Interpret the state byte
    pub fn relay_state(&self) -> Result<RelayState, RelayError> {
        RelayState::from_bit(self.state).map_err(|_| {
            RelayError::UnrecognizedResponse(format!(
                "feedback state byte {:#04x} for channel {}",
                self.state, self.channel
            ))
        })
    }
}

/// Decode a 4-byte feedback reply for a 1-based channel
pub fn decode_binary_feedback(data: &[u8], expected_channel: u8) -> Result<RelayState, RelayError> {
    FeedbackFrame::parse(data, expected_channel)?.relay_state()
}

fn status_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*ch([0-9]+):\s*(on|off)").expect("status line pattern is valid")
    })
}

/// Decode one `CH<n>: ON|OFF` status line into a 0-based channel and its state
pub fn decode_ascii_status_line(line: &str) -> Result<(usize, RelayState), RelayError> {
    let unrecognized = || RelayError::UnrecognizedResponse(format!("status line {:?}", line));

    let caps = status_line_pattern()
        .captures(line)
        .ok_or_else(unrecognized)?;

    let channel: usize = caps[1].parse().map_err(|_| unrecognized())?;
    if channel == 0 {
        return Err(unrecognized());
    }

    let state = RelayState::from(caps[2].eq_ignore_ascii_case("on"));
    Ok((channel - 1, state))
}

/// Checksum used by the older driver: `0xA0 + channel + (state % 0xFF)` with no truncation
pub fn legacy_checksum(channel: u8, state: u8) -> Result<u8, RelayError> {
    let sum = START_MARKER as usize + channel as usize + (state % 0xFF) as usize;
    u8::try_from(sum).map_err(|_| RelayError::InvalidChannel {
        channel: channel as usize,
        limit: u8::MAX.saturating_sub(START_MARKER).saturating_sub(state % 0xFF) as usize,
    })
}

/// Encode the older 6-byte set command: `[0xA0, channel, state, checksum, CR, LF]`
pub fn encode_legacy_command(channel: usize, on: bool) -> Result<[u8; 6], RelayError> {
    let frame = CommandFrame::new(channel, OpCode::actuate(RelayState::from(on)))?;
    let state = frame.op.byte();
    let sum = legacy_checksum(frame.channel, state)?;
    Ok([START_MARKER, frame.channel, state, sum, 0x0D, 0x0A])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_frames() {
        assert_eq!(encode_command(1, OpCode::Open).unwrap(), [0xA0, 0x01, 0x01, 0xA2]);
        assert_eq!(encode_command(2, OpCode::Close).unwrap(), [0xA0, 0x02, 0x00, 0xA2]);
        assert_eq!(encode_command(2, OpCode::Open).unwrap(), [0xA0, 0x02, 0x01, 0xA3]);
    }

    #[test]
    fn test_checksum_wraps() {
        // 0xA0 + 0xFF + 0x05 = 0x1A4
        assert_eq!(encode_command(255, OpCode::Check).unwrap()[3], 0xA4);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(matches!(
            encode_command(0, OpCode::Open),
            Err(RelayError::InvalidChannel { channel: 0, .. })
        ));
        assert!(matches!(
            encode_command(256, OpCode::Open),
            Err(RelayError::InvalidChannel { channel: 256, .. })
        ));
    }

    #[test]
    fn test_feedback_checksum_verification() {
        let mut reply = [0xA0, 0x01, 0x01, 0xA2];
        assert_eq!(decode_binary_feedback(&reply, 1).unwrap(), RelayState::Open);

        // Corrupt the checksum
        reply[3] ^= 0xFF;
        assert!(matches!(
            decode_binary_feedback(&reply, 1),
            Err(RelayError::ChecksumError { expected: 0xA2, .. })
        ));
    }

    #[test]
    fn test_feedback_channel_mismatch() {
        let reply = [0xA0, 0x02, 0x00, 0xA2];
        assert!(matches!(
            decode_binary_feedback(&reply, 1),
            Err(RelayError::ChannelMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_feedback_short_reply() {
        assert!(matches!(
            decode_binary_feedback(&[0xA0, 0x01], 1),
            Err(RelayError::IncompleteResponse {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_feedback_start_marker_policy() {
        let reply = [0xB0, 0x01, 0x00, 0xB1];
        assert!(FeedbackFrame::parse(&reply, 1).is_ok());
        assert!(matches!(
            FeedbackFrame::parse_strict(&reply, 1),
            Err(RelayError::UnrecognizedResponse(_))
        ));
    }

    #[test]
    fn test_feedback_state_byte_out_of_range() {
        let reply = [0xA0, 0x01, 0x07, 0xA8];
        assert!(matches!(
            decode_binary_feedback(&reply, 1),
            Err(RelayError::UnrecognizedResponse(_))
        ));
    }

    #[test]
    fn test_ascii_status_lines() {
        assert_eq!(decode_ascii_status_line("CH3: ON").unwrap(), (2, RelayState::Open));
        assert_eq!(decode_ascii_status_line("ch3:off").unwrap(), (2, RelayState::Closed));
        assert_eq!(
            decode_ascii_status_line("  Ch1:  On\r\n").unwrap(),
            (0, RelayState::Open)
        );
        assert!(matches!(
            decode_ascii_status_line("garbage"),
            Err(RelayError::UnrecognizedResponse(_))
        ));
        assert!(decode_ascii_status_line("CH0: ON").is_err());
        assert!(decode_ascii_status_line("CH: ON").is_err());
    }

    #[test]
    fn test_legacy_frame() {
        assert_eq!(
            encode_legacy_command(1, true).unwrap(),
            [0xA0, 0x01, 0x01, 0xA2, 0x0D, 0x0A]
        );
        assert_eq!(
            encode_legacy_command(4, false).unwrap(),
            [0xA0, 0x04, 0x00, 0xA4, 0x0D, 0x0A]
        );
    }

    #[test]
    fn test_legacy_checksum_does_not_truncate() {
        // 0xA0 + 0x5F + 1 = 0x100 would wrap to 0x00 in the modern framing
        assert_eq!(encode_command(0x5F, OpCode::Open).unwrap()[3], 0x00);
        assert!(matches!(
            encode_legacy_command(0x5F, true),
            Err(RelayError::InvalidChannel { channel: 0x5F, .. })
        ));
    }
}
