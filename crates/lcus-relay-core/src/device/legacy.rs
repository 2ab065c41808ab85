//! Older LCUS driver framing
//!
//! Differs from [`AsciiStatusDevice`](super::AsciiStatusDevice) on the wire: set commands
//! are `[0xA0, ch, state, checksum, CR, LF]` with a checksum that is never truncated,
//! status queries carry a trailing CR/LF, and a status line is read as open unless it
//! contains `OFF`.

use std::time::Duration;

use super::{verify_state, DeviceProtocol, DeviceState, RelayDevice};
use crate::protocol::{
    encode_legacy_command, frame::LEGACY_QUERY_STATUS, serial::read_lines, RelayError,
    RelayState, SharedTransport,
};

/// Settle delay used by the older driver
pub const LEGACY_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Driver speaking the older LCUS framing
#[derive(Debug)]
pub struct LegacyDevice {
    link: SharedTransport,
    state: DeviceState,
    settle_delay: Duration,
}

impl LegacyDevice {
    /// Create a driver without touching the board
    pub fn new(link: SharedTransport) -> Self {
        Self {
            link,
            state: DeviceState::new(),
            settle_delay: LEGACY_SETTLE_DELAY,
        }
    }

    /// Create a driver and read the board's status, as the older driver did on construction
    pub fn connect(link: SharedTransport) -> Result<Self, RelayError> {
        Self::new(link).connected()
    }

    /// Query the board once and return the driver
    pub fn connected(mut self) -> Result<Self, RelayError> {
        self.query_raw_lines()?;
        Ok(self)
    }

    /// Pause after each write before reading
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Query the board and return its lines, trimmed; cached states follow line order
    pub fn query_raw_lines(&mut self) -> Result<Vec<Vec<u8>>, RelayError> {
        let delay = self.settle_delay;
        let lines = self.link.exchange(|port| {
            port.write_all(&LEGACY_QUERY_STATUS)?;
            std::thread::sleep(delay);
            read_lines(port)
        })?;

        let lines: Vec<Vec<u8>> = lines.iter().map(|l| l.trim_ascii().to_vec()).collect();

        // One line per relay, in channel order
        let report: Vec<_> = lines
            .iter()
            .map(|line| RelayState::from(!line.windows(3).any(|w| w == b"OFF")))
            .enumerate()
            .collect();
        self.state.commit_report(&report)?;

        Ok(lines)
    }

    fn set_relay(&mut self, channel: usize, target: RelayState) -> Result<(), RelayError> {
        let frame = encode_legacy_command(channel + 1, target.is_open())?;
        self.state.set(channel, target)?;
        let delay = self.settle_delay;
        self.link.exchange(|port| {
            tracing::debug!("channel {}: legacy set {:02x?}", channel, frame);
            port.write_all(&frame)?;
            std::thread::sleep(delay);
            Ok(())
        })
    }

    fn actuate(&mut self, channel: usize, target: RelayState, verify: bool) -> Result<(), RelayError> {
        self.state.ensure_valid(channel)?;
        self.set_relay(channel, target)?;
        if verify {
            std::thread::sleep(self.settle_delay);
            let actual = self.check(channel)?;
            verify_state(channel, target, actual)?;
        }
        Ok(())
    }
}

impl RelayDevice for LegacyDevice {
    fn protocol(&self) -> DeviceProtocol {
        DeviceProtocol::Legacy
    }

    fn open(&mut self, channel: usize, verify: bool) -> Result<(), RelayError> {
        self.actuate(channel, RelayState::Open, verify)
    }

    fn close(&mut self, channel: usize, verify: bool) -> Result<(), RelayError> {
        self.actuate(channel, RelayState::Closed, verify)
    }

    fn invert(&mut self, channel: usize, verify: bool) -> Result<RelayState, RelayError> {
        let target = self.state.get(channel)?.toggled();
        self.actuate(channel, target, verify)?;
        self.check(channel)
    }

    fn check(&mut self, channel: usize) -> Result<RelayState, RelayError> {
        self.state.ensure_valid(channel)?;
        self.query_raw_lines()?;
        self.state.get(channel)
    }

    fn query_status(&mut self) -> Result<Vec<RelayState>, RelayError> {
        self.query_raw_lines()?;
        Ok(self.state.detected())
    }

    fn channel_count(&mut self) -> Result<usize, RelayError> {
        if let Some(count) = self.state.count().known() {
            return Ok(count);
        }
        self.query_raw_lines()?;
        Ok(self.state.count().known().unwrap_or(0))
    }

    fn cached_state(&self, channel: usize) -> Result<RelayState, RelayError> {
        self.state.get(channel)
    }

    fn reported_state(&self, channel: usize) -> Option<RelayState> {
        self.state.reported(channel)
    }
}
