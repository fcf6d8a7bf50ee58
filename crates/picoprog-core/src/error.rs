//! Error types for picoprog-core
//!
//! The serprog wire protocol only knows ACK and NAK. These errors are the
//! crate-internal view: rejections are turned into a NAK by the dispatcher,
//! link and bus failures end the session.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Link errors
    /// The host closed the byte stream
    Disconnected,
    /// The byte stream reported an error
    Transport(embedded_io::ErrorKind),

    // Bus errors
    /// The SPI peripheral reported an error
    Spi(embedded_hal::spi::ErrorKind),

    // Rejected requests
    /// A clock rate of 0 Hz was requested (reserved value)
    InvalidFrequency,
    /// Chip-select index is not wired on this board
    InvalidChipSelect(u8),
}

impl Error {
    /// Whether the error ends the session (as opposed to a NAK'd command)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Transport(_) | Self::Spi(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "host link closed"),
            Self::Transport(kind) => write!(f, "host link error: {:?}", kind),
            Self::Spi(kind) => write!(f, "SPI error: {}", kind),
            Self::InvalidFrequency => write!(f, "SPI clock rate of 0 Hz is reserved"),
            Self::InvalidChipSelect(cs) => write!(f, "chip select {} is not available", cs),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
