//! Simulated programmer board
//!
//! Four chip-select lines, one SPI controller and an [`EmulatedFlash`] wired
//! to one of the lines. The pin and SPI handles share the board state, so
//! the flash sees exactly the electrical sequence the dispatcher produces.

use std::cell::RefCell;
use std::convert::Infallible;
use std::io::{BufReader, BufWriter, Read as _, Write as _};
use std::net::TcpStream;
use std::rc::Rc;
use std::time::{Duration, Instant};

use picoprog_core::bus::{pl022, SpiController};
use picoprog_core::config::{NUM_CS, RP2040_CLK_PERI_HZ};
use picoprog_core::cs::{ChipSelectPin, ChipSelects, PinMode};

use crate::error::EmuError;
use crate::flash::EmulatedFlash;

/// Byte clocked out on MOSI during a read phase
const MOSI_IDLE: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Line {
    mode: PinMode,
    high: bool,
}

impl Line {
    /// Whether the line is actively pulled low
    fn asserted(&self) -> bool {
        self.mode == PinMode::Output && !self.high
    }
}

struct BoardState {
    flash: EmulatedFlash,
    flash_cs: usize,
    lines: [Line; NUM_CS],
    spi_powered: bool,
    spi_clock_hz: u32,
}

impl BoardState {
    fn update_flash_select(&mut self) {
        let asserted = self.lines[self.flash_cs].asserted();
        match (asserted, self.flash.is_selected()) {
            (true, false) => self.flash.select(),
            (false, true) => self.flash.deselect(),
            _ => {}
        }
    }
}

/// Shared handle to the simulated board
#[derive(Clone)]
pub struct SimBoard(Rc<RefCell<BoardState>>);

impl SimBoard {
    /// Board with `flash` wired to chip select `flash_cs`
    pub fn new(flash: EmulatedFlash, flash_cs: usize) -> Result<Self, EmuError> {
        if flash_cs >= NUM_CS {
            return Err(EmuError::InvalidChipSelect(flash_cs, NUM_CS));
        }
        Ok(Self(Rc::new(RefCell::new(BoardState {
            flash,
            flash_cs,
            lines: [Line {
                mode: PinMode::Floating,
                high: true,
            }; NUM_CS],
            spi_powered: false,
            spi_clock_hz: 0,
        }))))
    }

    /// SPI controller of the board
    pub fn spi(&self) -> SimSpi {
        SimSpi(self.clone())
    }

    /// Chip-select lines of the board
    pub fn chip_selects(&self) -> ChipSelects<SimPin, SimDelay, NUM_CS> {
        let pins = core::array::from_fn(|index| SimPin {
            index,
            board: self.clone(),
        });
        ChipSelects::new(pins, SimDelay)
    }

    /// Run `f` on the emulated flash
    pub fn with_flash<R>(&self, f: impl FnOnce(&EmulatedFlash) -> R) -> R {
        f(&self.0.borrow().flash)
    }

    /// SPI clock currently programmed
    pub fn spi_clock_hz(&self) -> u32 {
        self.0.borrow().spi_clock_hz
    }
}

#[cfg(test)]
impl SimBoard {
    /// Electrical mode of a chip-select line
    pub fn line_mode(&self, index: usize) -> PinMode {
        self.0.borrow().lines[index].mode
    }

    /// Whether the SPI peripheral is running
    pub fn spi_powered(&self) -> bool {
        self.0.borrow().spi_powered
    }
}

/// PL022 stand-in that clocks bytes through the emulated flash
pub struct SimSpi(SimBoard);

impl embedded_hal::spi::ErrorType for SimSpi {
    type Error = Infallible;
}

impl embedded_hal::spi::SpiBus<u8> for SimSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut board = self.0 .0.borrow_mut();
        for w in words.iter_mut() {
            // A stopped peripheral samples nothing; MISO reads as pulled up
            *w = if board.spi_powered {
                board.flash.exchange(MOSI_IDLE)
            } else {
                0xFF
            };
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut board = self.0 .0.borrow_mut();
        if board.spi_powered {
            for &w in words {
                board.flash.exchange(w);
            }
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut board = self.0 .0.borrow_mut();
        if !board.spi_powered {
            read.fill(0xFF);
            return Ok(());
        }
        for i in 0..read.len().max(write.len()) {
            let miso = board.flash.exchange(write.get(i).copied().unwrap_or(MOSI_IDLE));
            if let Some(r) = read.get_mut(i) {
                *r = miso;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut board = self.0 .0.borrow_mut();
        if !board.spi_powered {
            words.fill(0xFF);
            return Ok(());
        }
        for w in words.iter_mut() {
            *w = board.flash.exchange(*w);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl SpiController for SimSpi {
    fn power_up(&mut self, hz: u32) -> u32 {
        let actual = self.set_baudrate(hz);
        self.0 .0.borrow_mut().spi_powered = true;
        actual
    }

    fn power_down(&mut self) {
        self.0 .0.borrow_mut().spi_powered = false;
    }

    fn set_baudrate(&mut self, hz: u32) -> u32 {
        let actual = pl022::achievable_rate(RP2040_CLK_PERI_HZ, hz);
        self.0 .0.borrow_mut().spi_clock_hz = actual;
        actual
    }
}

/// One chip-select GPIO of the simulated board
pub struct SimPin {
    index: usize,
    board: SimBoard,
}

impl ChipSelectPin for SimPin {
    fn set_mode(&mut self, mode: PinMode) {
        let mut board = self.board.0.borrow_mut();
        board.lines[self.index].mode = mode;
        board.update_flash_select();
    }

    fn set_level(&mut self, high: bool) {
        let mut board = self.board.0.borrow_mut();
        board.lines[self.index].high = high;
        board.update_flash_select();
    }
}

/// Busy-wait delay, precise enough for chip-select settling
pub struct SimDelay;

impl embedded_hal::delay::DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        let deadline = Instant::now() + Duration::from_nanos(ns as u64);
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Host link over a TCP connection, as used by `serprog:ip=HOST:PORT`
pub struct TcpLink {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TcpLink {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
        })
    }
}

impl embedded_io::ErrorType for TcpLink {
    type Error = std::io::Error;
}

impl embedded_io::Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.reader.read(buf)
    }
}

impl embedded_io::Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.writer.flush()
    }
}
