//! SPI bus driver
//!
//! [`SpiBus`] is a thin synchronous wrapper around the board's SPI
//! peripheral. It owns the bus configuration (enabled flag and clock rate)
//! and knows how to hand the shared SCK/MOSI/MISO lines to the peripheral and
//! back. Transfers never yield: once an SPI exchange starts it runs to
//! completion.

use crate::config::DEFAULT_SPI_CLOCK_HZ;
use crate::error::{Error, Result};
use embedded_hal::spi::{Error as _, SpiBus as HalSpiBus};

/// SPI peripheral as seen by the bus driver
///
/// On top of the blocking `embedded-hal` byte transfers the peripheral must
/// control its own power and the function of the three shared signal lines,
/// and report the clock rate its divider actually produces.
pub trait SpiController: HalSpiBus<u8> {
    /// Route SCK/MOSI/MISO to the peripheral and start it at `hz`.
    ///
    /// Returns the actual clock rate.
    fn power_up(&mut self, hz: u32) -> u32;

    /// Stop the peripheral and leave SCK/MOSI/MISO as inputs without pulls
    fn power_down(&mut self);

    /// Program the closest achievable rate not above `hz`; returns it.
    ///
    /// `hz` is never 0. May be called while powered down, in which case the
    /// rate applies from the next `power_up`.
    fn set_baudrate(&mut self, hz: u32) -> u32;
}

/// Bus configuration, owned by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Whether the bus lines are driven
    pub enabled: bool,
    /// Current SPI clock rate (never 0)
    pub clock_rate_hz: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            clock_rate_hz: DEFAULT_SPI_CLOCK_HZ,
        }
    }
}

/// SPI bus driver
pub struct SpiBus<S> {
    spi: S,
    config: BusConfig,
}

impl<S: SpiController> SpiBus<S> {
    /// Wrap a peripheral; the bus starts disabled at the default clock rate
    pub fn new(spi: S) -> Self {
        Self::with_config(spi, BusConfig::default())
    }

    /// Wrap a peripheral with an explicit initial configuration.
    ///
    /// The configuration is recorded only; call [`enable`](Self::enable) to
    /// drive the bus. A zero clock rate falls back to the default.
    pub fn with_config(spi: S, mut config: BusConfig) -> Self {
        if config.clock_rate_hz == 0 {
            config.clock_rate_hz = DEFAULT_SPI_CLOCK_HZ;
        }
        let enabled = config.enabled;
        config.enabled = false;
        let mut bus = Self { spi, config };
        if enabled {
            bus.enable();
        }
        bus
    }

    /// Current configuration
    pub fn config(&self) -> BusConfig {
        self.config
    }

    /// Whether the bus is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Current clock rate in Hz
    pub fn clock_rate_hz(&self) -> u32 {
        self.config.clock_rate_hz
    }

    /// Underlying peripheral
    pub fn peripheral(&self) -> &S {
        &self.spi
    }

    /// Underlying peripheral (mutable)
    pub fn peripheral_mut(&mut self) -> &mut S {
        &mut self.spi
    }

    /// Release the peripheral
    pub fn into_inner(self) -> S {
        self.spi
    }

    /// Drive the bus at the configured clock rate
    pub fn enable(&mut self) {
        let actual = self.spi.power_up(self.config.clock_rate_hz);
        self.config.clock_rate_hz = actual;
        self.config.enabled = true;
        log::info!("SPI bus enabled at {} Hz", actual);
    }

    /// Stop the peripheral and float the shared lines
    pub fn disable(&mut self) {
        self.spi.power_down();
        self.config.enabled = false;
        log::info!("SPI bus disabled");
    }

    /// Request a clock rate; returns the rate actually in effect.
    ///
    /// 0 Hz is reserved and rejected without touching the current rate.
    pub fn set_clock(&mut self, requested_hz: u32) -> Result<u32> {
        if requested_hz == 0 {
            return Err(Error::InvalidFrequency);
        }
        let actual = self.spi.set_baudrate(requested_hz);
        self.config.clock_rate_hz = actual;
        log::info!(
            "SPI clock: requested {} Hz, set to {} Hz",
            requested_hz,
            actual
        );
        Ok(actual)
    }

    /// Clock out `data`, discarding what comes back
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        HalSpiBus::write(&mut self.spi, data).map_err(spi_error)?;
        HalSpiBus::flush(&mut self.spi).map_err(spi_error)
    }

    /// Clock in `buf.len()` bytes while MOSI idles
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        HalSpiBus::read(&mut self.spi, buf).map_err(spi_error)?;
        HalSpiBus::flush(&mut self.spi).map_err(spi_error)
    }

    /// Write phase followed by read phase; lengths are independent
    pub fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> Result<()> {
        self.write(write)?;
        self.read(read)
    }
}

fn spi_error<E: embedded_hal::spi::Error>(e: E) -> Error {
    Error::Spi(e.kind())
}

/// Clock divider model of the ARM PL022 SSP (RP2040 SPI0/SPI1)
///
/// `rate = clk_peri / (prescale * postdiv)` with `prescale` even in
/// `2..=254` and `postdiv` in `1..=256`.
pub mod pl022 {
    /// Smallest prescaler
    pub const MIN_PRESCALE: u32 = 2;
    /// Largest prescaler
    pub const MAX_PRESCALE: u32 = 254;
    /// Largest post-divider
    pub const MAX_POSTDIV: u32 = 256;

    /// Divider settings for one clock rate
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClockDivider {
        /// CPSDVSR value (even)
        pub prescale: u32,
        /// SCR + 1
        pub postdiv: u32,
    }

    impl ClockDivider {
        /// Pick the divider for the fastest rate not above `hz`.
        ///
        /// Requests above `clk_peri / 2` get the fastest setting; requests
        /// below the slowest setting get the slowest setting.
        pub fn for_rate(clk_peri: u32, hz: u32) -> Self {
            // Work on half the total divider so the "prescale is even" rule
            // drops out. Smallest ratio whose truncated rate is <= hz.
            let ratio = clk_peri as u64 / (2 * (hz as u64 + 1)) + 1;
            let ratio = ratio.min((MAX_PRESCALE / 2 * MAX_POSTDIV) as u64) as u32;

            let half_prescale = ratio.div_ceil(MAX_POSTDIV);
            let postdiv = ratio.div_ceil(half_prescale);

            Self {
                prescale: half_prescale * 2,
                postdiv,
            }
        }

        /// Clock rate produced by this divider
        pub fn rate(&self, clk_peri: u32) -> u32 {
            clk_peri / (self.prescale * self.postdiv)
        }
    }

    /// Rate the PL022 produces for a request of `hz`
    pub fn achievable_rate(clk_peri: u32, hz: u32) -> u32 {
        ClockDivider::for_rate(clk_peri, hz).rate(clk_peri)
    }

    /// Fastest rate the PL022 can produce
    pub fn max_rate(clk_peri: u32) -> u32 {
        clk_peri / MIN_PRESCALE
    }
}
