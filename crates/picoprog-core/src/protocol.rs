//! Serprog protocol constants and types
//!
//! Based on the Serial Flasher Protocol Specification version 1.

use bitflags::bitflags;

/// Protocol version we implement
pub const SERPROG_PROTOCOL_VERSION: u16 = 1;

/// ACK response byte
pub const S_ACK: u8 = 0x06;
/// NAK response byte
pub const S_NAK: u8 = 0x15;

// Command opcodes
/// No operation
pub const S_CMD_NOP: u8 = 0x00;
/// Query interface version
pub const S_CMD_Q_IFACE: u8 = 0x01;
/// Query supported commands bitmap
pub const S_CMD_Q_CMDMAP: u8 = 0x02;
/// Query programmer name
pub const S_CMD_Q_PGMNAME: u8 = 0x03;
/// Query serial buffer size
pub const S_CMD_Q_SERBUF: u8 = 0x04;
/// Query supported bustypes
pub const S_CMD_Q_BUSTYPE: u8 = 0x05;
/// Query connected address lines
pub const S_CMD_Q_CHIPSIZE: u8 = 0x06;
/// Query operation buffer size
pub const S_CMD_Q_OPBUF: u8 = 0x07;
/// Query maximum write-n length
pub const S_CMD_Q_WRNMAXLEN: u8 = 0x08;
/// Read a single byte
pub const S_CMD_R_BYTE: u8 = 0x09;
/// Read n bytes
pub const S_CMD_R_NBYTES: u8 = 0x0A;
/// Initialize operation buffer
pub const S_CMD_O_INIT: u8 = 0x0B;
/// Write to opbuf: Write byte with address
pub const S_CMD_O_WRITEB: u8 = 0x0C;
/// Write to opbuf: Write-N
pub const S_CMD_O_WRITEN: u8 = 0x0D;
/// Write opbuf: delay
pub const S_CMD_O_DELAY: u8 = 0x0E;
/// Execute operation buffer
pub const S_CMD_O_EXEC: u8 = 0x0F;
/// Special no-operation that returns NAK+ACK (for synchronization)
pub const S_CMD_SYNCNOP: u8 = 0x10;
/// Query maximum read-n length
pub const S_CMD_Q_RDNMAXLEN: u8 = 0x11;
/// Set used bustype(s)
pub const S_CMD_S_BUSTYPE: u8 = 0x12;
/// Perform SPI operation
pub const S_CMD_O_SPIOP: u8 = 0x13;
/// Set SPI clock frequency
pub const S_CMD_S_SPI_FREQ: u8 = 0x14;
/// Enable/disable output drivers
pub const S_CMD_S_PIN_STATE: u8 = 0x15;
/// Set SPI chip select to use
pub const S_CMD_S_SPI_CS: u8 = 0x16;
/// Set SPI mode (half/full duplex)
pub const S_CMD_S_SPI_MODE: u8 = 0x17;
/// Set CS mode (auto/selected/deselected)
pub const S_CMD_S_CS_MODE: u8 = 0x18;

/// Largest length an O_SPIOP length field can carry (24 bits)
pub const MAX_SPIOP_LEN: u32 = (1 << 24) - 1;

bitflags! {
    /// Bus type flags (Q_BUSTYPE / S_BUSTYPE)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BusTypes: u8 {
        /// Parallel bus
        const PARALLEL = 1 << 0;
        /// LPC bus
        const LPC      = 1 << 1;
        /// FWH bus
        const FWH      = 1 << 2;
        /// SPI bus
        const SPI      = 1 << 3;

        /// Non-SPI buses (PARALLEL | LPC | FWH)
        const NONSPI = Self::PARALLEL.bits() | Self::LPC.bits() | Self::FWH.bits();
    }
}

/// Human readable name of an opcode, for logs and `picoprog caps`
pub fn command_name(opcode: u8) -> Option<&'static str> {
    let name = match opcode {
        S_CMD_NOP => "NOP",
        S_CMD_Q_IFACE => "Q_IFACE",
        S_CMD_Q_CMDMAP => "Q_CMDMAP",
        S_CMD_Q_PGMNAME => "Q_PGMNAME",
        S_CMD_Q_SERBUF => "Q_SERBUF",
        S_CMD_Q_BUSTYPE => "Q_BUSTYPE",
        S_CMD_Q_CHIPSIZE => "Q_CHIPSIZE",
        S_CMD_Q_OPBUF => "Q_OPBUF",
        S_CMD_Q_WRNMAXLEN => "Q_WRNMAXLEN",
        S_CMD_R_BYTE => "R_BYTE",
        S_CMD_R_NBYTES => "R_NBYTES",
        S_CMD_O_INIT => "O_INIT",
        S_CMD_O_WRITEB => "O_WRITEB",
        S_CMD_O_WRITEN => "O_WRITEN",
        S_CMD_O_DELAY => "O_DELAY",
        S_CMD_O_EXEC => "O_EXEC",
        S_CMD_SYNCNOP => "SYNCNOP",
        S_CMD_Q_RDNMAXLEN => "Q_RDNMAXLEN",
        S_CMD_S_BUSTYPE => "S_BUSTYPE",
        S_CMD_O_SPIOP => "O_SPIOP",
        S_CMD_S_SPI_FREQ => "S_SPI_FREQ",
        S_CMD_S_PIN_STATE => "S_PIN_STATE",
        S_CMD_S_SPI_CS => "S_SPI_CS",
        S_CMD_S_SPI_MODE => "S_SPI_MODE",
        S_CMD_S_CS_MODE => "S_CS_MODE",
        _ => return None,
    };
    Some(name)
}

/// Decode a 24-bit little-endian length field
pub fn u24_from_le(buf: [u8; 3]) -> u32 {
    (buf[0] as u32) | ((buf[1] as u32) << 8) | ((buf[2] as u32) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u24_is_little_endian() {
        assert_eq!(u24_from_le([0x00, 0x10, 0x00]), 4096);
        assert_eq!(u24_from_le([0xFF, 0xFF, 0xFF]), MAX_SPIOP_LEN);
    }

    #[test]
    fn bus_type_spi_bit() {
        assert_eq!(BusTypes::SPI.bits(), 0x08);
        assert!(!BusTypes::NONSPI.contains(BusTypes::SPI));
    }

    #[test]
    fn names_cover_the_known_opcodes() {
        assert_eq!(command_name(S_CMD_O_SPIOP), Some("O_SPIOP"));
        assert_eq!(command_name(S_CMD_SYNCNOP), Some("SYNCNOP"));
        assert_eq!(command_name(0x19), None);
    }
}
