//! Headless power sequencing for LCUS USB relay boards
//!
//! ```text
//! lcus-relay --action ON
//! lcus-relay -a reset -c ./relay_config.json
//! lcus-relay --simulate -v
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use lcus_relay_core::prelude::*;
use lcus_relay_core::sim::BoardFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum Action {
    On,
    Off,
    Reset,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProtocolArg {
    Ascii,
    Feedback,
    Legacy,
}

impl From<ProtocolArg> for DeviceProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Ascii => DeviceProtocol::Ascii,
            ProtocolArg::Feedback => DeviceProtocol::Feedback,
            ProtocolArg::Legacy => DeviceProtocol::Legacy,
        }
    }
}

/// Switch a device's power and USB relays in a safe order
#[derive(Debug, Parser)]
#[command(name = "lcus-relay", version = lcus_relay_core::VERSION)]
struct Args {
    /// Sequence to run; reports the current state when omitted
    #[arg(short, long, value_enum, ignore_case = true)]
    action: Option<Action>,

    /// Configuration file [default: ~/.lcus_relay/relay_config.json]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Board dialect, overriding the configuration
    #[arg(long, value_enum)]
    protocol: Option<ProtocolArg>,

    /// Drive an in-memory board instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Log every frame to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<RelayConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path().context("Failed to locate the configuration directory")?,
    };
    let mut config = RelayConfig::load_or_create(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    if let Some(port) = &args.port {
        config.relay_control_port = port.clone();
    }
    if let Some(protocol) = args.protocol {
        config.protocol = protocol.into();
    }
    Ok(config)
}

fn open_link(config: &RelayConfig, simulate: bool) -> Result<SharedTransport> {
    if simulate {
        let family = match config.protocol {
            DeviceProtocol::Feedback => BoardFamily::Feedback,
            DeviceProtocol::Ascii | DeviceProtocol::Legacy => BoardFamily::Ascii,
        };
        tracing::info!("using a simulated {:?} board", family);
        return Ok(SharedTransport::new(SimulatedBoard::new(family, 2)));
    }

    let port = SerialTransport::open(
        &config.relay_control_port,
        config.baudrate,
        config.read_timeout(),
    )
    .with_context(|| format!("Failed to open relay board on {}", config.relay_control_port))?;
    Ok(SharedTransport::new(port))
}

fn run(args: Args) -> Result<String> {
    let config = load_config(&args)?;
    let link = open_link(&config, args.simulate)?;
    let device = shared_device(config.protocol, link, None)
        .with_context(|| format!("Failed to connect to {} relay board", config.protocol))?;
    let sequencer = PowerSequencer::new(device, config.sequencer_config()?);

    let action = match args.action.unwrap_or(Action::Status) {
        Action::On => SequenceAction::On,
        Action::Off => SequenceAction::Off,
        Action::Reset => SequenceAction::Reset,
        Action::Status => {
            let status = sequencer
                .read_logical_status()
                .context("Failed to read relay status")?;
            return Ok(format!("Status: {}", status));
        }
    };

    sequencer
        .run(action)
        .with_context(|| format!("{} sequence failed", action))?;
    Ok(format!("{} sequence completed", action))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(message) => {
            println!("{}", message);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
