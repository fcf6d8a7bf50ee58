//! Test doubles for the hardware and host boundaries
//!
//! Every double records what happens to it in a shared [`EventLog`] so tests
//! can assert on the exact sequence of bus and pin operations.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::bus::{pl022, SpiController};
use crate::config::{NUM_CS, RP2040_CLK_PERI_HZ};
use crate::cs::{ChipSelectPin, ChipSelects, PinMode};

/// Something observable that happened on the simulated board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SpiPowerUp(u32),
    SpiPowerDown,
    SpiBaudrate(u32),
    SpiWrite(usize),
    SpiRead(usize),
    PinMode(usize, PinMode),
    PinLevel(usize, bool),
    Delay(u32),
}

/// Shared, ordered event record
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<Event> {
        core::mem::take(&mut *self.0.borrow_mut())
    }
}

/// SPI peer that echoes every byte written, in order, on later reads.
///
/// Once the echo queue is empty reads return 0xFF (MISO pulled up).
pub struct MockSpi {
    log: EventLog,
    echo: VecDeque<u8>,
    written: Vec<u8>,
    powered: bool,
    fail: Option<embedded_hal::spi::ErrorKind>,
}

impl MockSpi {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            echo: VecDeque::new(),
            written: Vec::new(),
            powered: false,
            fail: None,
        }
    }

    /// Every byte clocked out so far
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Make every following transfer fail with `kind`
    pub fn fail_with(&mut self, kind: embedded_hal::spi::ErrorKind) {
        self.fail = Some(kind);
    }

    fn check(&self) -> Result<(), embedded_hal::spi::ErrorKind> {
        match self.fail {
            Some(kind) => Err(kind),
            None => Ok(()),
        }
    }
}

impl embedded_hal::spi::ErrorType for MockSpi {
    type Error = embedded_hal::spi::ErrorKind;
}

impl embedded_hal::spi::SpiBus<u8> for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.check()?;
        self.log.push(Event::SpiRead(words.len()));
        for w in words.iter_mut() {
            *w = self.echo.pop_front().unwrap_or(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.check()?;
        self.log.push(Event::SpiWrite(words.len()));
        self.written.extend_from_slice(words);
        self.echo.extend(words.iter().copied());
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.write(write)?;
        self.read(read)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let out = words.to_vec();
        self.write(&out)?;
        self.read(words)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl SpiController for MockSpi {
    fn power_up(&mut self, hz: u32) -> u32 {
        let actual = pl022::achievable_rate(RP2040_CLK_PERI_HZ, hz);
        self.powered = true;
        self.log.push(Event::SpiPowerUp(actual));
        actual
    }

    fn power_down(&mut self) {
        self.powered = false;
        self.log.push(Event::SpiPowerDown);
    }

    fn set_baudrate(&mut self, hz: u32) -> u32 {
        let actual = pl022::achievable_rate(RP2040_CLK_PERI_HZ, hz);
        self.log.push(Event::SpiBaudrate(actual));
        actual
    }
}

/// Chip-select GPIO
pub struct MockPin {
    index: usize,
    mode: PinMode,
    high: bool,
    log: EventLog,
}

impl MockPin {
    pub fn new(index: usize, log: &EventLog) -> Self {
        Self {
            index,
            mode: PinMode::Floating,
            high: true,
            log: log.clone(),
        }
    }

    pub fn mode(&self) -> PinMode {
        self.mode
    }

    pub fn is_high(&self) -> bool {
        self.high
    }
}

impl ChipSelectPin for MockPin {
    fn set_mode(&mut self, mode: PinMode) {
        self.mode = mode;
        self.log.push(Event::PinMode(self.index, mode));
    }

    fn set_level(&mut self, high: bool) {
        self.high = high;
        self.log.push(Event::PinLevel(self.index, high));
    }
}

/// Delay that only records how long it was asked to wait
pub struct MockDelay(pub EventLog);

impl embedded_hal::delay::DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.push(Event::Delay(ns));
    }
}

pub type MockChipSelects = ChipSelects<MockPin, MockDelay, NUM_CS>;

/// The four chip-select lines of the reference board
pub fn mock_chip_selects(log: &EventLog) -> MockChipSelects {
    let pins = core::array::from_fn(|i| MockPin::new(i, log));
    ChipSelects::new(pins, MockDelay(log.clone()))
}

/// Scripted host link
///
/// Reads serve the scripted input and then report end of stream. Written
/// bytes become visible in [`flushed`](Self::flushed) only after a flush.
pub struct MockLink {
    input: Vec<u8>,
    pos: usize,
    pending: Vec<u8>,
    flushed: Vec<u8>,
}

impl MockLink {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.to_vec(),
            pos: 0,
            pending: Vec::new(),
            flushed: Vec::new(),
        }
    }

    /// Bytes delivered to the host
    pub fn flushed(&self) -> &[u8] {
        &self.flushed
    }

    /// Bytes written but not yet flushed
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Number of input bytes consumed so far
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Append more host input
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
    }

    fn read_some(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.input.len() - self.pos);
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn flush_pending(&mut self) {
        let pending = core::mem::take(&mut self.pending);
        self.flushed.extend_from_slice(&pending);
    }
}

impl embedded_io::ErrorType for MockLink {
    type Error = embedded_io::ErrorKind;
}

#[cfg(feature = "is_sync")]
impl embedded_io::Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(self.read_some(buf))
    }
}

#[cfg(feature = "is_sync")]
impl embedded_io::Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.flush_pending();
        Ok(())
    }
}

#[cfg(not(feature = "is_sync"))]
impl embedded_io_async::Read for MockLink {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(self.read_some(buf))
    }
}

#[cfg(not(feature = "is_sync"))]
impl embedded_io_async::Write for MockLink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.flush_pending();
        Ok(())
    }
}
