//! Controller configuration stored as JSON
//!
//! Default location is `~/.lcus_relay/relay_config.json`. A missing file is created
//! with defaults the first time it is loaded.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::device::DeviceProtocol;
use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, MAX_CHANNELS};
use crate::sequencer::SequencerConfig;

const CONFIG_DIR: &str = ".lcus_relay";
const CONFIG_FILE: &str = "relay_config.json";

/// Errors loading or validating a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The file is not valid JSON for these settings
    #[error("Invalid JSON in {}: {source}", path.display())]
    Parse {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A setting is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Board and sequencing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Serial port of the relay board
    pub relay_control_port: String,

    /// Serial baud rate
    pub baudrate: u32,

    /// Relay switching device power (1-based, as printed on the board)
    pub power_relay_channel: u8,

    /// Relay switching the USB path (1-based)
    pub usb_relay_channel: u8,

    /// Power relay wired through its normally-closed contact
    pub invert_power: bool,

    /// USB relay wired through its normally-closed contact
    pub invert_usb: bool,

    /// Seconds between power on and USB on
    pub power_to_usb_delay_s: f64,

    /// Seconds between other sequence steps
    pub inter_command_delay_s: f64,

    /// Wire dialect of the board
    pub protocol: DeviceProtocol,

    /// Serial read timeout in milliseconds
    pub read_timeout_ms: u64,
}

fn default_port() -> String {
    if cfg!(windows) {
        "COM5".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_control_port: default_port(),
            baudrate: DEFAULT_BAUD_RATE,
            power_relay_channel: 1,
            usb_relay_channel: 2,
            invert_power: false,
            invert_usb: false,
            power_to_usb_delay_s: 1.0,
            // 50ms is commonly recommended
            inter_command_delay_s: 0.05,
            protocol: DeviceProtocol::default(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// `~/.lcus_relay/relay_config.json`
pub fn default_config_path() -> io::Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Could not find home directory"))?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

impl RelayConfig {
    /// Load from `path`, writing defaults there first if the file does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("creating default configuration at {}", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }
        Self::load(path)
    }

    /// Load and validate from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }

    /// Reject out-of-range channels, unusable delays and a zero baud rate
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, channel) in [
            ("power_relay_channel", self.power_relay_channel),
            ("usb_relay_channel", self.usb_relay_channel),
        ] {
            if channel == 0 || channel as usize > MAX_CHANNELS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_CHANNELS, channel
                )));
            }
        }
        if self.power_relay_channel == self.usb_relay_channel {
            return Err(ConfigError::Invalid(
                "power and usb must use different relay channels".to_string(),
            ));
        }
        delay("power_to_usb_delay_s", self.power_to_usb_delay_s)?;
        delay("inter_command_delay_s", self.inter_command_delay_s)?;
        if self.baudrate == 0 {
            return Err(ConfigError::Invalid("baudrate must be positive".to_string()));
        }
        Ok(())
    }

    /// Serial read timeout as a [`Duration`]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Sequencer settings with 0-based channels
    pub fn sequencer_config(&self) -> Result<SequencerConfig, ConfigError> {
        self.validate()?;
        Ok(SequencerConfig {
            power_channel: self.power_relay_channel as usize - 1,
            usb_channel: self.usb_relay_channel as usize - 1,
            invert_power: self.invert_power,
            invert_usb: self.invert_usb,
            power_to_usb_delay: delay("power_to_usb_delay_s", self.power_to_usb_delay_s)?,
            inter_command_delay: delay("inter_command_delay_s", self.inter_command_delay_s)?,
        })
    }
}

/// Seconds from the file as a [`Duration`]; negative, NaN and overflowing values are rejected
fn delay(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        ConfigError::Invalid(format!(
            "{} must be a non-negative number of seconds, got {} ({})",
            name, secs, e
        ))
    })
}
