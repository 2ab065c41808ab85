//! EC Buying LCUS boards
//!
//! These boards switch relays with the standard 4-byte frame but can only report the
//! whole board at once: a `0xFF` query is answered with one `CH<n>: ON|OFF` line per
//! channel, and the end of the reply is only visible as a read that times out.

use std::time::Duration;

use super::{verify_state, DeviceCore, DeviceProtocol, RelayDevice, DEFAULT_SETTLE_DELAY};
use crate::protocol::{
    decode_ascii_status_line,
    frame::{LEGACY_QUERY_STATUS, QUERY_STATUS},
    serial::read_lines,
    RelayError, RelayState, SharedTransport,
};

/// Driver for boards that report status as ASCII lines
#[derive(Debug)]
pub struct AsciiStatusDevice {
    core: DeviceCore,
}

impl AsciiStatusDevice {
    /// Driver over an open link with the default settle delay
    pub fn new(link: SharedTransport) -> Self {
        Self {
            core: DeviceCore::new(link, DEFAULT_SETTLE_DELAY),
        }
    }

    /// Override the wait applied around status queries and verification reads
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.core.settle_delay = delay;
        self
    }

    /// Send the CR/LF-terminated query and return the board's lines, trimmed
    ///
    /// Kept for parity with the older driver: both must return identical lines for the
    /// same board. Cached states are updated from the lines, but not reset first.
    pub fn query_raw_lines(&mut self) -> Result<Vec<Vec<u8>>, RelayError> {
        let delay = self.core.settle_delay;
        let lines = self.core.link.exchange(|port| {
            port.write_all(&LEGACY_QUERY_STATUS)?;
            std::thread::sleep(delay);
            read_lines(port)
        })?;

        let report = decode_lines(&lines)?;
        self.core.state.merge_report(&report)?;

        Ok(lines.iter().map(|line| line.trim_ascii().to_vec()).collect())
    }

    fn actuate(&mut self, channel: usize, target: RelayState, verify: bool) -> Result<(), RelayError> {
        self.core.actuate(channel, target)?;
        if verify {
            self.core.settle();
            let actual = self.check(channel)?;
            verify_state(channel, target, actual)?;
        }
        Ok(())
    }
}

fn line_text(line: &[u8]) -> Result<&str, RelayError> {
    std::str::from_utf8(line)
        .map_err(|_| RelayError::UnrecognizedResponse(format!("non-ASCII status line {:02x?}", line)))
}

/// Decode every line before any of them touches the cache
fn decode_lines(lines: &[Vec<u8>]) -> Result<Vec<(usize, RelayState)>, RelayError> {
    lines
        .iter()
        .map(|line| decode_ascii_status_line(line_text(line)?))
        .collect()
}

impl RelayDevice for AsciiStatusDevice {
    fn protocol(&self) -> DeviceProtocol {
        DeviceProtocol::Ascii
    }

    fn open(&mut self, channel: usize, verify: bool) -> Result<(), RelayError> {
        self.actuate(channel, RelayState::Open, verify)
    }

    fn close(&mut self, channel: usize, verify: bool) -> Result<(), RelayError> {
        self.actuate(channel, RelayState::Closed, verify)
    }

    // No native invert on these boards
    fn invert(&mut self, channel: usize, verify: bool) -> Result<RelayState, RelayError> {
        match self.core.state.get(channel)? {
            RelayState::Closed => self.open(channel, verify)?,
            RelayState::Open => self.close(channel, verify)?,
        }
        self.check(channel)
    }

    /// Always re-queries the whole board
    fn check(&mut self, channel: usize) -> Result<RelayState, RelayError> {
        self.core.state.ensure_valid(channel)?;
        self.core.settle();
        self.query_status()?;
        self.core.state.get(channel)
    }

    fn query_status(&mut self) -> Result<Vec<RelayState>, RelayError> {
        let delay = self.core.settle_delay;
        let lines = self.core.link.exchange(|port| {
            port.reset_input_buffer()?;
            port.write_all(&QUERY_STATUS)?;
            port.flush()?;
            // The board does not answer without this pause
            std::thread::sleep(delay);
            read_lines(port)
        })?;

        let report = decode_lines(&lines)?;
        self.core.state.commit_report(&report)?;
        Ok(self.core.state.detected())
    }

    fn channel_count(&mut self) -> Result<usize, RelayError> {
        if let Some(count) = self.core.state.count().known() {
            return Ok(count);
        }
        self.query_status()?;
        Ok(self.core.state.count().known().unwrap_or(0))
    }

    fn cached_state(&self, channel: usize) -> Result<RelayState, RelayError> {
        self.core.state.get(channel)
    }

    fn reported_state(&self, channel: usize) -> Option<RelayState> {
        self.core.state.reported(channel)
    }
}
