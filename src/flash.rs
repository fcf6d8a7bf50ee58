//! In-memory SPI NOR flash
//!
//! The flash decodes the bytes it sees on MOSI while its chip select is
//! asserted, one byte at a time, the way a real part does. Program and erase
//! commands take effect when the chip select is released, and only if the
//! write-enable latch was set. Programming can only clear bits.

use crate::error::EmuError;

/// SPI NOR opcodes understood by the emulated part
pub mod opcodes {
    /// Read JEDEC ID
    pub const RDID: u8 = 0x9F;
    /// Read status register
    pub const RDSR: u8 = 0x05;
    /// Write enable
    pub const WREN: u8 = 0x06;
    /// Write disable
    pub const WRDI: u8 = 0x04;
    /// Read data
    pub const READ: u8 = 0x03;
    /// Fast read (one dummy byte)
    pub const FAST_READ: u8 = 0x0B;
    /// Page program
    pub const PP: u8 = 0x02;
    /// 4 KiB sector erase
    pub const SE_20: u8 = 0x20;
    /// 32 KiB block erase
    pub const BE_52: u8 = 0x52;
    /// 64 KiB block erase
    pub const BE_D8: u8 = 0xD8;
    /// Chip erase
    pub const CE_60: u8 = 0x60;
    /// Chip erase (alternate opcode)
    pub const CE_C7: u8 = 0xC7;
}

/// Status register: write enable latch (BUSY never reads set)
pub const STATUS_WEL: u8 = 1 << 1;

/// Page size for programming
pub const PAGE_SIZE: usize = 256;

/// Identity and geometry of the emulated part
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// JEDEC manufacturer ID
    pub manufacturer_id: u8,
    /// JEDEC device ID
    pub device_id: u16,
    /// Flash size in bytes (power of two)
    pub size: usize,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0xEF, // Winbond
            device_id: 0x4018,     // W25Q128FV
            size: 16 * 1024 * 1024,
        }
    }
}

impl FlashConfig {
    /// Config with the given 24-bit JEDEC ID (manufacturer in the top byte)
    pub fn with_jedec_id(mut self, jedec_id: u32) -> Self {
        self.manufacturer_id = (jedec_id >> 16) as u8;
        self.device_id = jedec_id as u16;
        self
    }

    fn validate(&self) -> Result<(), EmuError> {
        if self.size < PAGE_SIZE || !self.size.is_power_of_two() || self.size > 1 << 24 {
            return Err(EmuError::InvalidSize(self.size));
        }
        Ok(())
    }
}

/// Decoding state within one chip-select window
#[derive(Debug, Default)]
struct Transaction {
    opcode: Option<u8>,
    address: u32,
    address_left: u8,
    dummy_left: u8,
    /// Data-phase bytes exchanged so far
    offset: usize,
    /// Bytes latched by a page program, committed on deselect
    page: Option<[u8; PAGE_SIZE]>,
}

impl Transaction {
    fn address_complete(&self) -> bool {
        self.address_left == 0
    }
}

/// Emulated SPI NOR flash
pub struct EmulatedFlash {
    config: FlashConfig,
    data: Vec<u8>,
    write_enabled: bool,
    selected: bool,
    tx: Transaction,
}

impl EmulatedFlash {
    /// Create an erased flash
    pub fn new(config: FlashConfig) -> Result<Self, EmuError> {
        config.validate()?;
        let data = vec![0xFF; config.size];
        Ok(Self {
            config,
            data,
            write_enabled: false,
            selected: false,
            tx: Transaction::default(),
        })
    }

    /// Create a flash holding `image`; the rest of the array is erased
    pub fn with_data(config: FlashConfig, image: &[u8]) -> Result<Self, EmuError> {
        let mut flash = Self::new(config)?;
        if image.len() > flash.data.len() {
            return Err(EmuError::ImageTooLarge {
                len: image.len(),
                size: flash.data.len(),
            });
        }
        flash.data[..image.len()].copy_from_slice(image);
        Ok(flash)
    }

    /// Flash contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Identity and geometry
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Whether the chip select is currently asserted
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Current status register value
    pub fn status(&self) -> u8 {
        if self.write_enabled {
            STATUS_WEL
        } else {
            0
        }
    }

    /// Chip select went low: start a new command
    pub fn select(&mut self) {
        self.selected = true;
        self.tx = Transaction::default();
    }

    /// Chip select went high: commit the command
    pub fn deselect(&mut self) {
        if !self.selected {
            return;
        }
        self.selected = false;
        let tx = core::mem::take(&mut self.tx);
        if let Some(opcode) = tx.opcode {
            self.commit(opcode, &tx);
        }
    }

    /// Exchange one byte: `mosi` in, the returned byte out on MISO
    pub fn exchange(&mut self, mosi: u8) -> u8 {
        if !self.selected {
            return 0xFF;
        }

        let opcode = match self.tx.opcode {
            Some(opcode) => opcode,
            None => {
                self.start(mosi);
                return 0xFF;
            }
        };

        if self.tx.address_left > 0 {
            self.tx.address = (self.tx.address << 8) | mosi as u32;
            self.tx.address_left -= 1;
            return 0xFF;
        }
        if self.tx.dummy_left > 0 {
            self.tx.dummy_left -= 1;
            return 0xFF;
        }

        let offset = self.tx.offset;
        self.tx.offset += 1;

        match opcode {
            opcodes::RDID => {
                let id = [
                    self.config.manufacturer_id,
                    (self.config.device_id >> 8) as u8,
                    self.config.device_id as u8,
                ];
                id.get(offset).copied().unwrap_or(0xFF)
            }
            opcodes::RDSR => self.status(),
            opcodes::READ | opcodes::FAST_READ => {
                let index = (self.tx.address as usize + offset) % self.data.len();
                self.data[index]
            }
            opcodes::PP => {
                let start = self.tx.address as usize % PAGE_SIZE;
                let page = self.tx.page.get_or_insert([0xFF; PAGE_SIZE]);
                // Data beyond the page end wraps to its start
                page[(start + offset) % PAGE_SIZE] = mosi;
                0xFF
            }
            _ => 0xFF,
        }
    }

    fn start(&mut self, opcode: u8) {
        self.tx.opcode = Some(opcode);
        match opcode {
            opcodes::READ
            | opcodes::PP
            | opcodes::SE_20
            | opcodes::BE_52
            | opcodes::BE_D8 => self.tx.address_left = 3,
            opcodes::FAST_READ => {
                self.tx.address_left = 3;
                self.tx.dummy_left = 1;
            }
            opcodes::RDID
            | opcodes::RDSR
            | opcodes::WREN
            | opcodes::WRDI
            | opcodes::CE_60
            | opcodes::CE_C7 => {}
            _ => log::debug!("flash: ignoring opcode 0x{:02X}", opcode),
        }
    }

    fn commit(&mut self, opcode: u8, tx: &Transaction) {
        match opcode {
            opcodes::WREN => self.write_enabled = true,
            opcodes::WRDI => self.write_enabled = false,
            opcodes::PP if tx.address_complete() => {
                if let Some(page) = &tx.page {
                    if self.take_write_enable("page program") {
                        self.program_page(tx.address, page);
                    }
                }
            }
            opcodes::SE_20 if tx.address_complete() => self.erase(tx.address, 4 * 1024),
            opcodes::BE_52 if tx.address_complete() => self.erase(tx.address, 32 * 1024),
            opcodes::BE_D8 if tx.address_complete() => self.erase(tx.address, 64 * 1024),
            opcodes::CE_60 | opcodes::CE_C7 => {
                if self.take_write_enable("chip erase") {
                    log::debug!("flash: chip erase");
                    self.data.fill(0xFF);
                }
            }
            _ => {}
        }
    }

    /// Consume the write-enable latch; false if it was not set
    fn take_write_enable(&mut self, what: &str) -> bool {
        let enabled = self.write_enabled;
        if !enabled {
            log::warn!("flash: {} without write enable ignored", what);
        }
        self.write_enabled = false;
        enabled
    }

    fn program_page(&mut self, address: u32, page: &[u8; PAGE_SIZE]) {
        let base = (address as usize % self.data.len()) & !(PAGE_SIZE - 1);
        log::debug!("flash: program page at 0x{:06X}", base);
        for (cell, byte) in self.data[base..base + PAGE_SIZE].iter_mut().zip(page) {
            *cell &= *byte;
        }
    }

    fn erase(&mut self, address: u32, block: usize) {
        if !self.take_write_enable("erase") {
            return;
        }
        let block = block.min(self.data.len());
        let base = (address as usize % self.data.len()) & !(block - 1);
        log::debug!("flash: erase {} KiB at 0x{:06X}", block / 1024, base);
        self.data[base..base + block].fill(0xFF);
    }
}
