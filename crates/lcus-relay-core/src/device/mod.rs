//! Relay Device Drivers
//!
//! One behavioral contract, [`RelayDevice`], over three wire dialects:
//!
//! - [`AsciiStatusDevice`]: EC Buying LCUS-1/2/4/8 boards answering status queries with
//!   `CH<n>: ON|OFF` lines
//! - [`FeedbackDevice`]: SAMIROB boards answering with raw state bytes and 4-byte
//!   feedback frames
//! - [`LegacyDevice`]: the older LCUS framing with trailing CR/LF and an untruncated checksum
//!
//! The dialect is chosen when the driver is built, never sniffed from replies.

mod ascii;
mod feedback;
mod legacy;
mod state;

pub use ascii::AsciiStatusDevice;
pub use feedback::FeedbackDevice;
pub use legacy::LegacyDevice;
pub use state::{ChannelCount, DeviceState, StatusReport};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::protocol::{CommandFrame, OpCode, RelayError, RelayState, SharedTransport};

/// Default settle delay for the ASCII and feedback dialects
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Relay board driver
pub trait RelayDevice: Send {
    /// Wire dialect spoken by this driver
    fn protocol(&self) -> DeviceProtocol;

    /// Energize a relay (0-based channel). With `verify`, read it back after one settle delay.
    fn open(&mut self, channel: usize, verify: bool) -> Result<(), RelayError>;

    /// De-energize a relay (0-based channel). With `verify`, read it back after one settle delay.
    fn close(&mut self, channel: usize, verify: bool) -> Result<(), RelayError>;

    /// Toggle a relay and return the state it ended in
    fn invert(&mut self, channel: usize, verify: bool) -> Result<RelayState, RelayError>;

    /// Ask the board for the state of one relay
    fn check(&mut self, channel: usize) -> Result<RelayState, RelayError>;

    /// Fetch the state of every relay and overwrite the cached states with it
    fn query_status(&mut self) -> Result<Vec<RelayState>, RelayError>;

    /// Number of channels, querying the board if not yet detected
    fn channel_count(&mut self) -> Result<usize, RelayError>;

    /// Last known state of a relay, without I/O
    fn cached_state(&self, channel: usize) -> Result<RelayState, RelayError>;

    /// State of a relay as given by the last status reply, `None` if that reply
    /// did not cover it. No I/O.
    fn reported_state(&self, channel: usize) -> Option<RelayState>;

    /// Drive a relay to `state`
    fn set_state(&mut self, channel: usize, state: RelayState, verify: bool) -> Result<(), RelayError> {
        match state {
            RelayState::Open => self.open(channel, verify),
            RelayState::Closed => self.close(channel, verify),
        }
    }

    /// Set a relay from a numeric value: 0 closes, 1 opens
    fn set_value(&mut self, channel: usize, value: u8) -> Result<(), RelayError> {
        let state = RelayState::from_bit(value)?;
        self.set_state(channel, state, false)
    }

    /// Open every relay in channel order, stopping at the first failure
    fn open_all(&mut self, verify: bool) -> Result<(), RelayError> {
        for channel in 0..self.channel_count()? {
            self.open(channel, verify)?;
        }
        Ok(())
    }

    /// Close every relay in channel order, stopping at the first failure
    fn close_all(&mut self, verify: bool) -> Result<(), RelayError> {
        for channel in 0..self.channel_count()? {
            self.close(channel, verify)?;
        }
        Ok(())
    }
}

/// A driver shared between the sequencer and other callers
pub type SharedDevice = Arc<Mutex<dyn RelayDevice>>;

/// Supported wire dialects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProtocol {
    /// ASCII status lines (EC Buying LCUS boards)
    #[default]
    Ascii,
    /// Binary feedback frames (SAMIROB boards)
    Feedback,
    /// Older LCUS framing
    Legacy,
}

impl fmt::Display for DeviceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProtocol::Ascii => f.write_str("ascii"),
            DeviceProtocol::Feedback => f.write_str("feedback"),
            DeviceProtocol::Legacy => f.write_str("legacy"),
        }
    }
}

impl FromStr for DeviceProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" => Ok(DeviceProtocol::Ascii),
            "feedback" => Ok(DeviceProtocol::Feedback),
            "legacy" => Ok(DeviceProtocol::Legacy),
            other => Err(format!("unknown device protocol '{}'", other)),
        }
    }
}

/// Build a shared driver for `protocol` on `link`
///
/// The legacy driver queries the board while connecting, so this can fail.
pub fn shared_device(
    protocol: DeviceProtocol,
    link: SharedTransport,
    settle_delay: Option<Duration>,
) -> Result<SharedDevice, RelayError> {
    match protocol {
        DeviceProtocol::Ascii => {
            let mut device = AsciiStatusDevice::new(link);
            if let Some(delay) = settle_delay {
                device = device.with_settle_delay(delay);
            }
            Ok(share(device))
        }
        DeviceProtocol::Feedback => {
            let mut device = FeedbackDevice::new(link);
            if let Some(delay) = settle_delay {
                device = device.with_settle_delay(delay);
            }
            Ok(share(device))
        }
        DeviceProtocol::Legacy => {
            let mut device = LegacyDevice::new(link);
            if let Some(delay) = settle_delay {
                device = device.with_settle_delay(delay);
            }
            Ok(share(device.connected()?))
        }
    }
}

fn share<D: RelayDevice + 'static>(device: D) -> SharedDevice {
    Arc::new(Mutex::new(device))
}

/// Link, cache and settle delay shared by the ASCII and feedback drivers
#[derive(Debug)]
pub(crate) struct DeviceCore {
    pub(crate) link: SharedTransport,
    pub(crate) state: DeviceState,
    pub(crate) settle_delay: Duration,
}

impl DeviceCore {
    pub(crate) fn new(link: SharedTransport, settle_delay: Duration) -> Self {
        Self {
            link,
            state: DeviceState::new(),
            settle_delay,
        }
    }

    /// Wait for a relay to finish actuating
    pub(crate) fn settle(&self) {
        std::thread::sleep(self.settle_delay);
    }

    /// Write one command frame; no reply is read
    pub(crate) fn send_command(&self, channel: usize, op: OpCode) -> Result<(), RelayError> {
        let frame = CommandFrame::for_index(channel, op)?.to_bytes();
        self.link.exchange(|port| {
            tracing::debug!("channel {}: {:?} {:02x?}", channel, op, frame);
            port.write_all(&frame)?;
            port.flush()
        })
    }

    /// Update the cache optimistically, then send the plain actuation command
    pub(crate) fn actuate(&mut self, channel: usize, target: RelayState) -> Result<(), RelayError> {
        self.state.set(channel, target)?;
        self.send_command(channel, OpCode::actuate(target))
    }
}

/// Compare a read-back state against the commanded one
pub(crate) fn verify_state(
    channel: usize,
    expected: RelayState,
    actual: RelayState,
) -> Result<(), RelayError> {
    if actual != expected {
        tracing::warn!("channel {}: expected {}, read back {}", channel, expected, actual);
        return Err(RelayError::ActuationFailed {
            channel,
            expected,
            actual,
        });
    }
    Ok(())
}
