//! Serial Protocol Communication
//!
//! Implements the LCUS relay board protocol: 4-byte command frames with an additive
//! checksum, binary feedback replies, and the two status reply formats (raw state
//! bytes or `CH<n>: ON|OFF` lines).

pub mod commands;
mod error;
pub mod frame;
pub mod serial;

pub use commands::{OpCode, RelayState};
pub use error::RelayError;
pub use frame::{
    decode_ascii_status_line, decode_binary_feedback, encode_command, encode_legacy_command,
    CommandFrame, FeedbackFrame,
};
pub use serial::{configure_port, open_port, SerialTransport, SharedTransport, Transport};

/// Default baud rate for LCUS boards
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout in milliseconds
///
/// ASCII status replies end with a read that times out, so this bounds every status query.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 200;

/// Largest board supported
pub const MAX_CHANNELS: usize = 8;
