//! Chip-select manager
//!
//! Up to `N` chip-select lines share one SPI bus. While the bus is enabled
//! exactly one of them (the active one) is a driven output; the others are
//! inputs with pull-ups so that another bus master wired to the same flash can
//! still control it. When the bus is disabled every line floats.

use crate::config::{CS_SETTLE_NS, DEFAULT_CS};
use crate::error::{Error, Result};
use embedded_hal::delay::DelayNs;

/// Electrical configuration of a chip-select line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Push-pull output with strong (12 mA) drive
    Output,
    /// Input with the internal pull-up enabled
    InputPullUp,
    /// Input without pulls (high impedance)
    Floating,
}

/// One GPIO used as a chip-select line
pub trait ChipSelectPin {
    /// Change direction, drive strength and pulls
    fn set_mode(&mut self, mode: PinMode);

    /// Set the output level (only visible while in [`PinMode::Output`])
    fn set_level(&mut self, high: bool);
}

/// Chip-select lines of the board and the currently active one
pub struct ChipSelects<P, D, const N: usize> {
    pins: [P; N],
    active: usize,
    delay: D,
}

impl<P: ChipSelectPin, D: DelayNs, const N: usize> ChipSelects<P, D, N> {
    /// Take ownership of the lines; the default chip select is active.
    ///
    /// No pin is touched until [`engage`](Self::engage) or
    /// [`release`](Self::release). A board without any chip select is
    /// rejected at build time:
    ///
    /// ```compile_fail
    /// use picoprog_core::cs::{ChipSelectPin, ChipSelects, PinMode};
    ///
    /// struct Pin;
    /// impl ChipSelectPin for Pin {
    ///     fn set_mode(&mut self, _: PinMode) {}
    ///     fn set_level(&mut self, _: bool) {}
    /// }
    /// struct Delay;
    /// impl embedded_hal::delay::DelayNs for Delay {
    ///     fn delay_ns(&mut self, _: u32) {}
    /// }
    ///
    /// let _cs = ChipSelects::<Pin, Delay, 0>::new([], Delay);
    /// ```
    pub fn new(pins: [P; N], delay: D) -> Self {
        const { assert!(N > 0, "at least one chip select is required") };
        Self {
            pins,
            active: DEFAULT_CS.min(N - 1),
            delay,
        }
    }

    /// Number of chip-select lines
    pub const fn count(&self) -> usize {
        N
    }

    /// Index of the active chip select
    pub fn active(&self) -> usize {
        self.active
    }

    /// Access a line, e.g. to inspect a mock
    pub fn pin(&self, index: usize) -> Option<&P> {
        self.pins.get(index)
    }

    /// Deselect (drive high) and make the line a strong output
    pub fn use_as_output(pin: &mut P) {
        pin.set_level(true);
        pin.set_mode(PinMode::Output);
    }

    /// Let the line float high through the internal pull-up
    pub fn pull_up_as_input(pin: &mut P) {
        pin.set_mode(PinMode::InputPullUp);
    }

    /// Configure the lines for an enabled bus
    pub fn engage(&mut self) {
        for (i, pin) in self.pins.iter_mut().enumerate() {
            if i != self.active {
                Self::pull_up_as_input(pin);
            }
        }
        Self::use_as_output(&mut self.pins[self.active]);
    }

    /// Float every line (bus disabled)
    pub fn release(&mut self) {
        for pin in &mut self.pins {
            pin.set_mode(PinMode::Floating);
        }
    }

    /// Assert the active chip select
    pub fn select(&mut self) {
        self.delay.delay_ns(CS_SETTLE_NS);
        self.pins[self.active].set_level(false);
        self.delay.delay_ns(CS_SETTLE_NS);
    }

    /// Deassert the active chip select
    pub fn deselect(&mut self) {
        self.delay.delay_ns(CS_SETTLE_NS);
        self.pins[self.active].set_level(true);
        self.delay.delay_ns(CS_SETTLE_NS);
    }

    /// Make `index` the active chip select.
    ///
    /// With the bus enabled the old line is handed back to its pull-up before
    /// the new one is driven. With the bus disabled only the choice is
    /// recorded and takes effect on the next [`engage`](Self::engage).
    pub fn set_active(&mut self, index: u8, bus_enabled: bool) -> Result<()> {
        let new = index as usize;
        if new >= N {
            return Err(Error::InvalidChipSelect(index));
        }
        if bus_enabled && new != self.active {
            Self::pull_up_as_input(&mut self.pins[self.active]);
            Self::use_as_output(&mut self.pins[new]);
        }
        self.active = new;
        log::debug!("Using chip select {}", new);
        Ok(())
    }
}
