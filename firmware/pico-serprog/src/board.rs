//! RP2040 bindings for the dispatcher's hardware boundary

use embassy_rp::gpio::{Drive, Flex, Pull};
use embassy_rp::pac;
use embassy_rp::peripherals::SPI0;
use embassy_rp::spi::{Blocking, Spi};
use picoprog_core::bus::pl022::ClockDivider;
use picoprog_core::bus::SpiController;
use picoprog_core::cs::{ChipSelectPin, PinMode};

use crate::config::{SPI_MISO_PIN, SPI_MOSI_PIN, SPI_SCK_PIN};

// IO_BANK0 function selects
const FUNCSEL_SPI: u8 = 1;
const FUNCSEL_SIO: u8 = 5;

/// SPI0 with runtime clock control and pin release
///
/// While powered down the PL022 is stopped and SCK/MOSI/MISO are plain SIO
/// inputs without pulls, so another master can drive the flash. Transfers
/// attempted in that state clock nothing and read 0xFF.
pub struct PicoSpi {
    spi: Spi<'static, SPI0, Blocking>,
    divider: ClockDivider,
    powered: bool,
}

impl PicoSpi {
    /// Take over an initialized SPI0 and release its pins
    pub fn new(spi: Spi<'static, SPI0, Blocking>) -> Self {
        let mut this = Self {
            spi,
            divider: ClockDivider::for_rate(embassy_rp::clocks::clk_peri_freq(), 1),
            powered: true,
        };
        this.power_down();
        this
    }

    fn apply_divider(&self) {
        let regs = pac::SPI0;
        regs.cpsr()
            .write(|w| w.set_cpsdvsr(self.divider.prescale as u8));
        regs.cr0()
            .modify(|w| w.set_scr((self.divider.postdiv - 1) as u8));
    }

    fn rate(&self) -> u32 {
        self.divider.rate(embassy_rp::clocks::clk_peri_freq())
    }
}

fn route_bus_pins(funcsel: u8) {
    for pin in [SPI_SCK_PIN, SPI_MOSI_PIN, SPI_MISO_PIN] {
        pac::PADS_BANK0.gpio(pin).modify(|w| {
            w.set_ie(true);
            w.set_pue(false);
            w.set_pde(false);
            w.set_drive(pac::pads::vals::Drive::_12M_A);
        });
        pac::IO_BANK0
            .gpio(pin)
            .ctrl()
            .write(|w| w.set_funcsel(funcsel));
    }
}

impl embedded_hal::spi::ErrorType for PicoSpi {
    type Error = embassy_rp::spi::Error;
}

impl embedded_hal::spi::SpiBus<u8> for PicoSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        if !self.powered {
            words.fill(0xFF);
            return Ok(());
        }
        self.spi.blocking_read(words)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        if !self.powered {
            return Ok(());
        }
        self.spi.blocking_write(words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        if !self.powered {
            read.fill(0xFF);
            return Ok(());
        }
        self.spi.blocking_transfer(read, write)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        if !self.powered {
            words.fill(0xFF);
            return Ok(());
        }
        self.spi.blocking_transfer_in_place(words)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if !self.powered {
            return Ok(());
        }
        embedded_hal::spi::SpiBus::flush(&mut self.spi)
    }
}

impl SpiController for PicoSpi {
    fn power_up(&mut self, hz: u32) -> u32 {
        let actual = self.set_baudrate(hz);
        self.apply_divider();
        route_bus_pins(FUNCSEL_SPI);
        pac::SPI0.cr1().modify(|w| w.set_sse(true));
        self.powered = true;
        actual
    }

    fn power_down(&mut self) {
        let regs = pac::SPI0;
        while regs.sr().read().bsy() {}
        regs.cr1().modify(|w| w.set_sse(false));
        route_bus_pins(FUNCSEL_SIO);
        self.powered = false;
    }

    fn set_baudrate(&mut self, hz: u32) -> u32 {
        self.divider = ClockDivider::for_rate(embassy_rp::clocks::clk_peri_freq(), hz);
        if self.powered {
            self.apply_divider();
        }
        self.rate()
    }
}

/// One chip-select GPIO
pub struct CsLine(Flex<'static>);

impl CsLine {
    pub fn new(pin: Flex<'static>) -> Self {
        Self(pin)
    }
}

impl ChipSelectPin for CsLine {
    fn set_mode(&mut self, mode: PinMode) {
        match mode {
            PinMode::Output => {
                self.0.set_pull(Pull::None);
                self.0.set_drive_strength(Drive::_12mA);
                self.0.set_as_output();
            }
            PinMode::InputPullUp => {
                self.0.set_as_input();
                self.0.set_pull(Pull::Up);
            }
            PinMode::Floating => {
                self.0.set_as_input();
                self.0.set_pull(Pull::None);
            }
        }
    }

    fn set_level(&mut self, high: bool) {
        if high {
            self.0.set_high();
        } else {
            self.0.set_low();
        }
    }
}

/// Busy-wait delay counted in core clock cycles
pub struct CycleDelay;

impl embedded_hal::delay::DelayNs for CycleDelay {
    fn delay_ns(&mut self, ns: u32) {
        let sys_mhz = embassy_rp::clocks::clk_sys_freq() / 1_000_000;
        let cycles = (ns as u64 * sys_mhz as u64).div_ceil(1000).max(1);
        cortex_m::asm::delay(cycles as u32);
    }
}
