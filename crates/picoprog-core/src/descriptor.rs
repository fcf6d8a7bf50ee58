//! Capability descriptor tables
//!
//! Everything the query commands report is fixed at build time and lives
//! here: the supported command bitmap, the programmer name and the buffer and
//! bus capabilities.

use crate::protocol::*;

/// Number of 32-bit words in the command bitmap
pub const CMDMAP_WORDS: usize = 8;
/// Number of bytes in the command bitmap on the wire
pub const CMDMAP_SIZE: usize = CMDMAP_WORDS * 4;
/// Length of the programmer name on the wire
pub const NAME_LEN: usize = 16;

/// Serial buffer size advertised by Q_SERBUF.
///
/// Flow control on the USB link is the real limit, so the maximum is
/// reported.
pub const SERIAL_BUFFER_SIZE: u16 = 0xFFFF;

/// Opcodes this implementation answers with something other than NAK
pub const SUPPORTED_COMMANDS: &[u8] = &[
    S_CMD_NOP,
    S_CMD_Q_IFACE,
    S_CMD_Q_CMDMAP,
    S_CMD_Q_PGMNAME,
    S_CMD_Q_SERBUF,
    S_CMD_Q_BUSTYPE,
    S_CMD_SYNCNOP,
    S_CMD_O_SPIOP,
    S_CMD_S_BUSTYPE,
    S_CMD_S_SPI_FREQ,
    S_CMD_S_PIN_STATE,
    S_CMD_S_SPI_CS,
];

/// Supported commands bitmap
///
/// Bit `n` of the map (word `n / 32`, bit `n % 32`) is set when opcode `n`
/// is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMap {
    words: [u32; CMDMAP_WORDS],
}

impl CommandMap {
    /// Create an empty command map
    pub const fn new() -> Self {
        Self {
            words: [0; CMDMAP_WORDS],
        }
    }

    /// Build a map with the given opcodes marked as supported
    pub const fn from_opcodes(opcodes: &[u8]) -> Self {
        let mut map = Self::new();
        let mut i = 0;
        while i < opcodes.len() {
            let cmd = opcodes[i];
            map.words[(cmd / 32) as usize] |= 1 << (cmd % 32);
            i += 1;
        }
        map
    }

    /// Check if a command is supported
    pub const fn is_supported(&self, cmd: u8) -> bool {
        self.words[(cmd / 32) as usize] & (1 << (cmd % 32)) != 0
    }

    /// Wire representation: 8 little-endian 32-bit words
    pub fn to_bytes(&self) -> [u8; CMDMAP_SIZE] {
        let mut out = [0u8; CMDMAP_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Iterate over the supported opcodes in ascending order
    pub fn opcodes(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |&cmd| self.is_supported(cmd))
    }
}

impl Default for CommandMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity and capabilities reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Programmer name, NUL padded
    pub name: [u8; NAME_LEN],
    /// Interface version reported by Q_IFACE
    pub interface_version: u16,
    /// Supported commands
    pub cmdmap: CommandMap,
    /// Serial buffer size reported by Q_SERBUF
    pub serial_buffer_size: u16,
    /// Buses reported by Q_BUSTYPE
    pub bus_types: BusTypes,
}

impl Descriptor {
    /// Descriptor with the reference command set under the given name.
    ///
    /// Names longer than 16 bytes are truncated.
    pub const fn with_name(name: &str) -> Self {
        Self {
            name: pad_name(name),
            interface_version: SERPROG_PROTOCOL_VERSION,
            cmdmap: CommandMap::from_opcodes(SUPPORTED_COMMANDS),
            serial_buffer_size: SERIAL_BUFFER_SIZE,
            bus_types: BusTypes::SPI,
        }
    }

    /// Get the programmer name as a string
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("(invalid)")
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        DEFAULT_DESCRIPTOR
    }
}

/// The descriptor advertised by the Pico firmware
pub const DEFAULT_DESCRIPTOR: Descriptor = Descriptor::with_name("pico-serprog");

const fn pad_name(name: &str) -> [u8; NAME_LEN] {
    let bytes = name.as_bytes();
    let mut out = [0u8; NAME_LEN];
    let mut i = 0;
    while i < bytes.len() && i < NAME_LEN {
        out[i] = bytes[i];
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_cmdmap_layout() {
        let bytes = DEFAULT_DESCRIPTOR.cmdmap.to_bytes();
        // Word 0: 0x00..=0x05, 0x10, 0x12..=0x16
        let word0 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(word0, 0x007D_003F);
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn every_supported_command_is_in_the_map() {
        let map = DEFAULT_DESCRIPTOR.cmdmap;
        for &cmd in SUPPORTED_COMMANDS {
            assert!(map.is_supported(cmd), "0x{:02X} missing", cmd);
        }
        assert_eq!(map.opcodes().count(), SUPPORTED_COMMANDS.len());
        assert!(!map.is_supported(S_CMD_Q_RDNMAXLEN));
        assert!(!map.is_supported(0xFF));
    }

    #[test]
    fn name_is_nul_padded() {
        assert_eq!(&DEFAULT_DESCRIPTOR.name, b"pico-serprog\0\0\0\0");
        assert_eq!(DEFAULT_DESCRIPTOR.name_str(), "pico-serprog");

        let long = Descriptor::with_name("a-very-long-programmer-name");
        assert_eq!(long.name_str(), "a-very-long-prog");
    }
}
