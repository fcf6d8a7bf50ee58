//! Error types for the host emulator

use std::path::PathBuf;
use thiserror::Error;

/// Emulator errors
#[derive(Debug, Error)]
pub enum EmuError {
    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The flash image could not be read or written
    #[error("Flash image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image larger than the emulated flash
    #[error("Image is {len} bytes but the flash holds only {size} bytes")]
    ImageTooLarge { len: usize, size: usize },

    /// Flash size not supported
    #[error("Invalid flash size {0}: must be a power of two between 256 B and 16 MiB")]
    InvalidSize(usize),

    /// Flash wired to a chip select the board does not have
    #[error("Chip select {0} is not available (board has {1})")]
    InvalidChipSelect(usize, usize),

    /// The dispatcher stopped on a bus error
    #[error("Session failed: {0}")]
    Session(#[from] picoprog_core::Error),
}
