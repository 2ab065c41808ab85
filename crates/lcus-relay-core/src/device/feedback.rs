//! SAMIROB binary-feedback boards
//!
//! Besides plain open/close these boards understand op-codes that answer with a
//! `[0xA0, channel, state, checksum]` frame (open/close with feedback, invert, check),
//! and answer a `0xFF` status query with one raw state byte per channel.

use std::time::Duration;

use super::{verify_state, DeviceCore, DeviceProtocol, RelayDevice, DEFAULT_SETTLE_DELAY};
use crate::protocol::{
    frame::{FRAME_LEN, QUERY_STATUS},
    CommandFrame, FeedbackFrame, OpCode, RelayError, RelayState, SharedTransport,
};

/// Driver for boards that answer commands with feedback frames
#[derive(Debug)]
pub struct FeedbackDevice {
    core: DeviceCore,
    strict_start_marker: bool,
}

impl FeedbackDevice {
    /// Driver over an open link, lenient about the reply start byte
    pub fn new(link: SharedTransport) -> Self {
        Self {
            core: DeviceCore::new(link, DEFAULT_SETTLE_DELAY),
            strict_start_marker: false,
        }
    }

    /// Override the wait between a command and reading its feedback
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.core.settle_delay = delay;
        self
    }

    /// Reject feedback frames that do not start with 0xA0
    pub fn strict_start_marker(mut self, strict: bool) -> Self {
        self.strict_start_marker = strict;
        self
    }

    /// Energize a relay and return the state the board reports back
    pub fn open_with_feedback(&mut self, channel: usize) -> Result<RelayState, RelayError> {
        self.core.state.set(channel, RelayState::Open)?;
        self.command_with_feedback(channel, OpCode::OpenWithFeedback)
    }

    /// De-energize a relay and return the state the board reports back
    pub fn close_with_feedback(&mut self, channel: usize) -> Result<RelayState, RelayError> {
        self.core.state.set(channel, RelayState::Closed)?;
        self.command_with_feedback(channel, OpCode::CloseWithFeedback)
    }

    /// Send a feedback op-code and read the reply in the same exchange
    fn command_with_feedback(&mut self, channel: usize, op: OpCode) -> Result<RelayState, RelayError> {
        self.core.state.ensure_valid(channel)?;
        let frame = CommandFrame::for_index(channel, op)?;
        let bytes = frame.to_bytes();
        let delay = self.core.settle_delay;

        let reply = self.core.link.exchange(|port| {
            tracing::debug!("channel {}: {:?} {:02x?}", channel, op, bytes);
            port.write_all(&bytes)?;
            port.flush()?;
            // Wait for the relay to finish activating before reading
            std::thread::sleep(delay);
            port.read_up_to(FRAME_LEN)
        })?;
        tracing::debug!("channel {}: feedback {:02x?}", channel, reply);

        let feedback = if self.strict_start_marker {
            FeedbackFrame::parse_strict(&reply, frame.channel)?
        } else {
            FeedbackFrame::parse(&reply, frame.channel)?
        };
        let state = feedback.relay_state()?;
        self.core.state.set(channel, state)?;
        Ok(state)
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

impl RelayDevice for FeedbackDevice {
    fn protocol(&self) -> DeviceProtocol {
        DeviceProtocol::Feedback
    }

    fn open(&mut self, channel: usize, verify: bool) -> Result<(), RelayError> {
        self.actuate(channel, RelayState::Open, verify)
    }

    fn close(&mut self, channel: usize, verify: bool) -> Result<(), RelayError> {
        self.actuate(channel, RelayState::Closed, verify)
    }

    fn invert(&mut self, channel: usize, verify: bool) -> Result<RelayState, RelayError> {
        let before = self.core.state.get(channel)?;
        let state = self.command_with_feedback(channel, OpCode::Invert)?;
        if verify {
            verify_state(channel, before.toggled(), state)?;
        }
        Ok(state)
    }

    fn check(&mut self, channel: usize) -> Result<RelayState, RelayError> {
        self.command_with_feedback(channel, OpCode::Check)
    }

    fn query_status(&mut self) -> Result<Vec<RelayState>, RelayError> {
        let expected = self.core.state.limit();
        let delay = self.core.settle_delay;
        let reply = self.core.link.exchange(|port| {
            port.reset_input_buffer()?;
            port.write_all(&QUERY_STATUS)?;
            std::thread::sleep(delay);
            port.flush()?;
            port.read_up_to(expected)
        })?;
        tracing::debug!("status bytes {:02x?}", reply);

        let states = reply
            .iter()
            .map(|b| {
                RelayState::from_bit(*b).map_err(|_| {
                    RelayError::UnrecognizedResponse(format!("status byte {:#04x}", b))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let report: Vec<_> = states.iter().copied().enumerate().collect();
        self.core.state.commit_report(&report)?;

        Ok(states)
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
