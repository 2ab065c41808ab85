//! Protocol commands
//!
//! Op-codes understood by LCUS-style relay boards, and the two-valued relay state
//! they act on.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::RelayError;

/// Op-code byte of a `[0xA0, channel, op, checksum]` command frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    /// De-energize the relay
    Close,
    /// Energize the relay
    Open,
    /// De-energize and answer with a feedback frame
    CloseWithFeedback,
    /// Energize and answer with a feedback frame
    OpenWithFeedback,
    /// Toggle and answer with a feedback frame
    Invert,
    /// Answer with a feedback frame, no actuation
    Check,
}

impl OpCode {
    /// All op-codes in wire order
    pub const ALL: [OpCode; 6] = [
        OpCode::Close,
        OpCode::Open,
        OpCode::CloseWithFeedback,
        OpCode::OpenWithFeedback,
        OpCode::Invert,
        OpCode::Check,
    ];

    /// Get the wire byte for this op-code
    pub fn byte(&self) -> u8 {
        match self {
            OpCode::Close => 0,
            OpCode::Open => 1,
            OpCode::CloseWithFeedback => 2,
            OpCode::OpenWithFeedback => 3,
            OpCode::Invert => 4,
            OpCode::Check => 5,
        }
    }

    /// Decode a wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.byte() == byte)
    }

    /// Check if the board answers this command with a 4-byte feedback frame
    pub fn expects_feedback(&self) -> bool {
        !matches!(self, OpCode::Close | OpCode::Open)
    }

    /// Plain actuation op-code for a target state
    pub fn actuate(target: RelayState) -> Self {
        match target {
            RelayState::Open => OpCode::Open,
            RelayState::Closed => OpCode::Close,
        }
    }
}

/// Physical state of one relay, in the board's own convention
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayState {
    /// Energized / conducting, reported as `1` or `ON`
    Open,
    /// De-energized, reported as `0` or `OFF`
    #[default]
    Closed,
}

impl RelayState {
    /// Convert a `0`/`1` value
    pub fn from_bit(value: u8) -> Result<Self, RelayError> {
        match value {
            0 => Ok(RelayState::Closed),
            1 => Ok(RelayState::Open),
            other => Err(RelayError::InvalidValue(other)),
        }
    }

    /// The `0`/`1` wire value
    pub fn as_bit(&self) -> u8 {
        match self {
            RelayState::Open => 1,
            RelayState::Closed => 0,
        }
    }

    /// True when the coil is energized
    pub fn is_open(&self) -> bool {
        *self == RelayState::Open
    }

    /// The opposite state
    pub fn toggled(&self) -> Self {
        match self {
            RelayState::Open => RelayState::Closed,
            RelayState::Closed => RelayState::Open,
        }
    }
}

impl From<bool> for RelayState {
    fn from(open: bool) -> Self {
        if open {
            RelayState::Open
        } else {
            RelayState::Closed
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::Open => f.write_str("OPEN"),
            RelayState::Closed => f.write_str("CLOSED"),
        }
    }
}
