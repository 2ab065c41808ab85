//! Protocol errors

use thiserror::Error;

use super::RelayState;

/// Errors that can occur while talking to a relay board
#[derive(Error, Debug)]
pub enum RelayError {
    /// The serial port failed or could not be opened
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The port is closed or the board is gone
    #[error("Not connected to relay board")]
    NotConnected,

    /// The board answered with something no decoder accepts
    #[error("Unrecognized response from relay board: {0}")]
    UnrecognizedResponse(String),

    /// Fewer bytes arrived than the reply needs
    #[error("Incomplete response: expected {expected} bytes, got {actual}")]
    IncompleteResponse {
        /// Bytes the reply needs
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// A feedback frame names another channel
    #[error("Channel mismatch: expected channel {expected}, board answered for {actual}")]
    ChannelMismatch {
        /// Channel the command was sent to (1-based)
        expected: u8,
        /// Channel in the reply (1-based)
        actual: u8,
    },

    /// A feedback frame failed its checksum
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumError {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum byte received
        actual: u8,
    },

    /// Read-back after a verified command disagrees with the target
    #[error("Relay {channel} did not reach {expected} (read back {actual})")]
    ActuationFailed {
        /// Relay index (0-based)
        channel: usize,
        /// Commanded state
        expected: RelayState,
        /// State read back
        actual: RelayState,
    },

    /// Channel outside the board or the wire range
    #[error("Invalid channel {channel} (limit {limit})")]
    InvalidChannel {
        /// Requested channel
        channel: usize,
        /// Exclusive upper bound
        limit: usize,
    },

    /// A relay value other than 0 or 1
    #[error("Value must be 0 (closed) or 1 (open), got {0}")]
    InvalidValue(u8),

    /// A thread panicked while holding the port or device lock
    #[error("Shared lock poisoned by a panicked holder")]
    LockPoisoned,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RelayError {
    /// True for failures of the serial channel itself rather than of the protocol
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RelayError::SerialError(_) | RelayError::NotConnected | RelayError::IoError(_)
        )
    }
}

impl From<serialport::Error> for RelayError {
    fn from(e: serialport::Error) -> Self {
        RelayError::SerialError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(RelayError::NotConnected.is_transport());
        assert!(RelayError::SerialError("gone".into()).is_transport());
        assert!(!RelayError::InvalidValue(3).is_transport());
        assert!(!RelayError::ChecksumError {
            expected: 0xA2,
            actual: 0xA3
        }
        .is_transport());
    }

    #[test]
    fn test_actuation_message() {
        let err = RelayError::ActuationFailed {
            channel: 7,
            expected: RelayState::Open,
            actual: RelayState::Closed,
        };
        assert_eq!(err.to_string(), "Relay 7 did not reach OPEN (read back CLOSED)");
    }
}
