//! CLI argument parsing

use clap::{Parser, Subcommand};
use picoprog_core::config::{DEFAULT_CS, NUM_CS};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a size with an optional K or M suffix (e.g. "16M", "512K", "0x10000")
fn parse_size(s: &str) -> Result<usize, String> {
    let (digits, multiplier) = match s.as_bytes().last() {
        Some(b'K' | b'k') => (&s[..s.len() - 1], 1024),
        Some(b'M' | b'm') => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1),
    };
    let value = parse_hex_u32(digits)? as usize;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Size too large: {}", s))
}

fn parse_cs(s: &str) -> Result<usize, String> {
    let cs: usize = s.parse().map_err(|e| format!("Invalid number: {}", e))?;
    if cs >= NUM_CS {
        return Err(format!("Chip select must be below {}", NUM_CS));
    }
    Ok(cs)
}

#[derive(Parser)]
#[command(name = "picoprog")]
#[command(author, version, about = "serprog programmer emulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level asked for with -v/-vv, `None` keeps the default (info)
    pub fn log_level(&self) -> Option<log::LevelFilter> {
        match self.verbose {
            0 => None,
            1 => Some(log::LevelFilter::Debug),
            _ => Some(log::LevelFilter::Trace),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a simulated programmer with an emulated SPI flash over TCP
    ///
    /// Point flashprog at it with `-p serprog:ip=HOST:PORT`.
    Emulate {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8765")]
        listen: String,

        /// Flash size (e.g. 16M, 512K)
        #[arg(short, long, default_value = "16M", value_parser = parse_size)]
        size: usize,

        /// Initial flash image (erased flash if missing)
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Write the flash back to --image after every session
        #[arg(long, requires = "image")]
        save: bool,

        /// Chip select the flash is wired to
        #[arg(long, default_value_t = DEFAULT_CS, value_parser = parse_cs)]
        cs: usize,

        /// 24-bit JEDEC ID reported by the flash (manufacturer first)
        #[arg(long, default_value = "0xEF4018", value_parser = parse_hex_u32)]
        jedec_id: u32,
    },

    /// Print the capabilities the programmer advertises
    Caps,
}
