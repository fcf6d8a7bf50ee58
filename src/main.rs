//! picoprog - serprog programmer emulator
//!
//! Runs the `picoprog-core` dispatcher on the host. The board is simulated:
//! four chip-select lines and an in-memory SPI NOR flash, served over TCP so
//! flashprog (`-p serprog:ip=HOST:PORT`) or rflasher can talk to it exactly
//! as they would to the Pico firmware over USB.

mod cli;
mod emulator;
mod error;
mod flash;
mod sim;

use clap::Parser;
use cli::{Cli, Commands};
use emulator::{Emulator, EmulatorConfig};
use flash::FlashConfig;
use picoprog_core::descriptor::{Descriptor, DEFAULT_DESCRIPTOR};
use picoprog_core::protocol::command_name;
use std::net::TcpListener;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logger; -v/-vv override RUST_LOG's global level
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = cli.log_level() {
        logger.filter_level(level);
    }
    logger.init();

    match cli.command {
        Commands::Emulate {
            listen,
            size,
            image,
            save,
            cs,
            jedec_id,
        } => {
            let config = EmulatorConfig {
                flash: FlashConfig {
                    size,
                    ..FlashConfig::default()
                }
                .with_jedec_id(jedec_id),
                flash_cs: cs,
                image,
                save,
            };
            let emulator = Emulator::new(config)?;
            emulator.board().with_flash(|flash| {
                let config = flash.config();
                log::info!(
                    "Emulating {} KiB flash (JEDEC {:02X}{:04X}) on CS{}",
                    config.size / 1024,
                    config.manufacturer_id,
                    config.device_id,
                    cs
                );
            });
            let listener = TcpListener::bind(&listen)?;
            emulator.serve(&listener)?;
        }
        Commands::Caps => print_caps(&DEFAULT_DESCRIPTOR),
    }

    Ok(())
}

fn print_caps(descriptor: &Descriptor) {
    println!("Programmer:        {}", descriptor.name_str());
    println!("Interface version: {}", descriptor.interface_version);
    println!("Serial buffer:     {} bytes", descriptor.serial_buffer_size);
    println!("Bus types:         {:?}", descriptor.bus_types);
    println!("Commands:");
    for opcode in descriptor.cmdmap.opcodes() {
        println!(
            "  0x{:02X}  {}",
            opcode,
            command_name(opcode).unwrap_or("(unknown)")
        );
    }
}
