//! Multidrop one-wire bus primitives.
//!
//! The electrical layer is assumed reliable; integrity is checked at the
//! protocol layer with the Dallas/Maxim CRC-8 carried in ROM codes and
//! scratchpads (`crc8`).

use crate::BoxError;

/// Address every device on the bus at once.
pub const CMD_SKIP_ROM: u8 = 0xCC;
/// Address one device by its 8-byte ROM code.
pub const CMD_MATCH_ROM: u8 = 0x55;
/// Start a temperature conversion.
pub const CMD_CONVERT_T: u8 = 0x44;
/// Read the 9-byte scratchpad.
pub const CMD_READ_SCRATCHPAD: u8 = 0xBE;

/// Length of a device ROM code.
pub const ROM_LEN: usize = 8;
/// Length of a scratchpad read, CRC byte included.
pub const SCRATCHPAD_LEN: usize = 9;

pub type Rom = [u8; ROM_LEN];

/// Request/response primitives of a one-wire master.
pub trait OneWire {
    /// Issue a bus reset; returns true when at least one device answered with a presence pulse.
    fn reset(&mut self) -> Result<bool, BoxError>;
    /// Address all devices (`CMD_SKIP_ROM`).
    fn skip(&mut self) -> Result<(), BoxError>;
    /// Address a single device (`CMD_MATCH_ROM` + ROM code).
    fn select(&mut self, rom: &Rom) -> Result<(), BoxError>;
    fn write_byte(&mut self, byte: u8) -> Result<(), BoxError>;
    fn read_byte(&mut self) -> Result<u8, BoxError>;
    /// Read a single time slot. Devices hold the line low (false) while converting.
    fn read_bit(&mut self) -> Result<bool, BoxError>;
    /// Restart device enumeration from the first device.
    fn reset_search(&mut self);
    /// Next device ROM code in enumeration order, `None` once all were returned.
    fn search(&mut self) -> Result<Option<Rom>, BoxError>;
}

impl<W: OneWire + ?Sized> OneWire for Box<W> {
    fn reset(&mut self) -> Result<bool, BoxError> {
        (**self).reset()
    }
    fn skip(&mut self) -> Result<(), BoxError> {
        (**self).skip()
    }
    fn select(&mut self, rom: &Rom) -> Result<(), BoxError> {
        (**self).select(rom)
    }
    fn write_byte(&mut self, byte: u8) -> Result<(), BoxError> {
        (**self).write_byte(byte)
    }
    fn read_byte(&mut self) -> Result<u8, BoxError> {
        (**self).read_byte()
    }
    fn read_bit(&mut self) -> Result<bool, BoxError> {
        (**self).read_bit()
    }
    fn reset_search(&mut self) {
        (**self).reset_search()
    }
    fn search(&mut self) -> Result<Option<Rom>, BoxError> {
        (**self).search()
    }
}

/// Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1, reflected 0x8C).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            b >>= 1;
        }
    }
    crc
}
