// Compiled-in board and protocol configuration.

// =============================================================================
// SPI bus
// =============================================================================

/// SPI clock rate applied at power-on and until the host asks for another (Hz).
pub const DEFAULT_SPI_CLOCK_HZ: u32 = 12_000_000;

/// RP2040 peripheral clock (`clk_peri`) at default clocks.
pub const RP2040_CLK_PERI_HZ: u32 = 125_000_000;

// =============================================================================
// Chip selects
// =============================================================================

/// Number of usable chip-select lines.
pub const NUM_CS: usize = 4;

/// Chip select used until the host selects another one.
pub const DEFAULT_CS: usize = 0;

/// Settling time around every chip-select edge (ns).
///
/// Roughly three instruction cycles at 125 MHz; must stay non-zero.
pub const CS_SETTLE_NS: u32 = 24;

// =============================================================================
// Bulk transfers
// =============================================================================

/// Scratch buffer size for O_SPIOP; every SPI call moves at most this much.
pub const SPI_CHUNK_SIZE: usize = 4096;
