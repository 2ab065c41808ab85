//! # LCUS Relay Core Library
//!
//! Control of LCUS-style USB serial relay boards.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The 4-byte command frame codec and both status reply formats
//! - Drivers for the ASCII-status, binary-feedback and older LCUS board variants
//! - A power sequencer that keeps a device's USB path off until its power has settled
//! - JSON configuration stored under the user's home directory
//! - A simulated board for running without hardware
//!
//! ## Supported Boards
//!
//! - EC Buying LCUS-1/2/4/8 (ASCII status lines)
//! - SAMIROB 1/2/4/8 channel boards (binary feedback)
//!
//! ## Example
//!
//! ```rust,ignore
//! use lcus_relay_core::prelude::*;
//!
//! let config = RelayConfig::load_or_create(&default_config_path()?)?;
//! let port = SerialTransport::open(&config.relay_control_port, config.baudrate, config.read_timeout())?;
//! let device = shared_device(config.protocol, SharedTransport::new(port), None)?;
//!
//! let sequencer = PowerSequencer::new(device, config.sequencer_config()?);
//! sequencer.run(SequenceAction::Reset)?;
//! println!("{}", sequencer.read_logical_status()?);
//! ```

pub mod config;
pub mod device;
pub mod protocol;
pub mod sequencer;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{default_config_path, ConfigError, RelayConfig};
    pub use crate::device::{
        shared_device, AsciiStatusDevice, DeviceProtocol, FeedbackDevice, LegacyDevice,
        RelayDevice, SharedDevice,
    };
    pub use crate::protocol::{
        OpCode, RelayError, RelayState, SerialTransport, SharedTransport, Transport,
    };
    pub use crate::sequencer::{LogicalStatus, PowerSequencer, SequenceAction, SequencerConfig};
    pub use crate::sim::{BoardFamily, SimulatedBoard};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
