//! Power Sequencing
//!
//! Drives a two-function board where one relay switches a device's power and another
//! switches its USB path. The USB path must never be live before power has settled, so
//! compound sequences always drop USB first and raise it last, after a configured delay.
//!
//! Either relay may be wired through its normally-closed contact, in which case an
//! energized relay means the function is off. The per-function invert flags map
//! between the two meanings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use crate::device::SharedDevice;
use crate::protocol::{RelayError, RelayState};

/// Map a logical on/off to the relay's energized state
pub fn logical_to_physical(logical_on: bool, invert: bool) -> bool {
    logical_on ^ invert
}

/// Map a relay's energized state back to logical on/off
pub fn physical_to_logical(physical_on: bool, invert: bool) -> bool {
    physical_on ^ invert
}

/// Channel assignment, polarity and timing for a sequencer
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerConfig {
    /// Power relay (0-based)
    pub power_channel: usize,
    /// USB relay (0-based)
    pub usb_channel: usize,
    /// Power relay wired through its normally-closed contact
    pub invert_power: bool,
    /// USB relay wired through its normally-closed contact
    pub invert_usb: bool,
    /// Wait between power coming up and USB being enabled
    pub power_to_usb_delay: Duration,
    /// Wait between any other two steps
    pub inter_command_delay: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            power_channel: 0,
            usb_channel: 1,
            invert_power: false,
            invert_usb: false,
            power_to_usb_delay: Duration::from_secs(1),
            inter_command_delay: Duration::from_millis(50),
        }
    }
}

/// Compound actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SequenceAction {
    /// USB off, power on, then USB on
    On,
    /// Power off, then USB off
    Off,
    /// Off followed by On
    Reset,
}

impl fmt::Display for SequenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceAction::On => f.write_str("ON"),
            SequenceAction::Off => f.write_str("OFF"),
            SequenceAction::Reset => f.write_str("RESET"),
        }
    }
}

impl FromStr for SequenceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ON" => Ok(SequenceAction::On),
            "OFF" => Ok(SequenceAction::Off),
            "RESET" => Ok(SequenceAction::Reset),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Logical state of both functions; `None` when the board did not report the channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalStatus {
    /// Device power
    pub power: Option<bool>,
    /// USB path
    pub usb: Option<bool>,
}

fn describe(state: Option<bool>) -> &'static str {
    match state {
        Some(true) => "ON",
        Some(false) => "OFF",
        None => "UNKNOWN",
    }
}

impl fmt::Display for LogicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "power {}, usb {}", describe(self.power), describe(self.usb))
    }
}

/// Runs power/USB sequences against one shared driver
pub struct PowerSequencer {
    device: SharedDevice,
    config: SequencerConfig,
    sequence_lock: Mutex<()>,
}

impl PowerSequencer {
    /// Sequencer over an already-built driver
    pub fn new(device: SharedDevice, config: SequencerConfig) -> Self {
        Self {
            device,
            config,
            sequence_lock: Mutex::new(()),
        }
    }

    /// Settings this sequencer was built with
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// The driver this sequencer commands
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Switch power on or off, honoring its polarity
    pub fn set_power(&self, on: bool) -> Result<(), RelayError> {
        let physical = logical_to_physical(on, self.config.invert_power);
        tracing::info!("power {}", if on { "on" } else { "off" });
        self.drive(self.config.power_channel, physical)
    }

    /// Switch the USB path on or off, honoring its polarity
    pub fn set_usb(&self, on: bool) -> Result<(), RelayError> {
        let physical = logical_to_physical(on, self.config.invert_usb);
        tracing::info!("usb {}", if on { "on" } else { "off" });
        self.drive(self.config.usb_channel, physical)
    }

    // The device lock is held for one step only, never across the waits
    fn drive(&self, channel: usize, energized: bool) -> Result<(), RelayError> {
        let mut device = self.device.lock().map_err(|_| RelayError::LockPoisoned)?;
        device.set_state(channel, RelayState::from(energized), false)
    }

    fn wait(&self, delay: Duration) {
        std::thread::sleep(delay);
    }

    /// USB off, power on, then USB on once power has settled
    pub fn sequence_on(&self) -> Result<(), RelayError> {
        let _guard = self.sequence_lock.lock().map_err(|_| RelayError::LockPoisoned)?;
        self.set_usb(false)?;
        self.wait(self.config.inter_command_delay);
        self.set_power(true)?;
        self.wait(self.config.power_to_usb_delay);
        self.set_usb(true)
    }

    /// Power off, then USB off
    pub fn sequence_off(&self) -> Result<(), RelayError> {
        let _guard = self.sequence_lock.lock().map_err(|_| RelayError::LockPoisoned)?;
        self.set_power(false)?;
        self.wait(self.config.inter_command_delay);
        self.set_usb(false)
    }

    /// Full power cycle ending in the same order as [`PowerSequencer::sequence_on`]
    pub fn sequence_reset(&self) -> Result<(), RelayError> {
        let _guard = self.sequence_lock.lock().map_err(|_| RelayError::LockPoisoned)?;
        self.set_power(false)?;
        self.wait(self.config.inter_command_delay);
        self.set_usb(false)?;
        self.wait(self.config.inter_command_delay);
        self.set_power(true)?;
        self.wait(self.config.power_to_usb_delay);
        self.set_usb(true)
    }

    /// Run one named sequence
    pub fn run(&self, action: SequenceAction) -> Result<(), RelayError> {
        tracing::info!("running sequence {}", action);
        match action {
            SequenceAction::On => self.sequence_on(),
            SequenceAction::Off => self.sequence_off(),
            SequenceAction::Reset => self.sequence_reset(),
        }
    }

    /// Query the board and translate both functions to logical state
    pub fn read_logical_status(&self) -> Result<LogicalStatus, RelayError> {
        let mut device = self.device.lock().map_err(|_| RelayError::LockPoisoned)?;
        device.query_status()?;

        // Only what the board actually reported; a skipped channel stays unknown
        let logical = |channel: usize, invert: bool| {
            device
                .reported_state(channel)
                .map(|state| physical_to_logical(state.is_open(), invert))
        };

        Ok(LogicalStatus {
            power: logical(self.config.power_channel, self.config.invert_power),
            usb: logical(self.config.usb_channel, self.config.invert_usb),
        })
    }
}
