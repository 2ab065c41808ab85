//! Relay Board Demo
//!
//! Opens a relay, reads it back, queries the whole board and closes every relay.
//!
//! Usage:
//!   cargo run --example relay_demo -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --feedback        Board answers with binary feedback frames
//!   --simulate        Use an in-memory 4-channel board

use lcus_relay_core::prelude::*;
use std::time::Duration;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut port_name = "/dev/ttyUSB0".to_string();
    let mut protocol = DeviceProtocol::Ascii;
    let mut simulate = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_name = args[i].clone();
                }
            }
            "--feedback" => protocol = DeviceProtocol::Feedback,
            "--simulate" => simulate = true,
            other => eprintln!("Ignoring unknown argument {}", other),
        }
        i += 1;
    }

    if let Err(e) = run(&port_name, protocol, simulate) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(port_name: &str, protocol: DeviceProtocol, simulate: bool) -> Result<(), RelayError> {
    let link = if simulate {
        let family = match protocol {
            DeviceProtocol::Feedback => BoardFamily::Feedback,
            _ => BoardFamily::Ascii,
        };
        SharedTransport::new(SimulatedBoard::new(family, 4))
    } else {
        println!("Opening {} at 9600 baud", port_name);
        SharedTransport::new(SerialTransport::open(port_name, 9600, Duration::from_millis(200))?)
    };

    let device = shared_device(protocol, link, None)?;
    let mut device = device.lock().map_err(|_| RelayError::LockPoisoned)?;

    device.open(0, false)?;
    if device.check(0)? == RelayState::Open {
        println!("The first relay is open.");
    }

    device.set_value(1, 1)?;
    if device.check(1)?.is_open() {
        println!("The second relay is open.");
    }

    let states: Vec<u8> = device.query_status()?.iter().map(RelayState::as_bit).collect();
    println!("{:?}", states);

    device.close_all(false)?;
    println!("Closed {} relays", device.channel_count()?);
    Ok(())
}
