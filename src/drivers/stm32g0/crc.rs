//! Hardware CRC unit, configured to match the software CRC-32.
use crate::{
    hal::crc::Crc32,
    stm32pac::{CRC, RCC},
};
use core::ptr;

const CRCEN: u32 = 1 << 12;

mod cr {
    pub const RESET: u32 = 1 << 0;
    /// Bit reversal of input data done by byte.
    pub const REV_IN_BYTE: u32 = 0b01 << 5;
    pub const REV_OUT: u32 = 1 << 7;
}

pub struct HardwareCrc {
    crc: CRC,
}

impl HardwareCrc {
    pub fn new(crc: CRC, rcc: &mut RCC) -> Self {
        // NOTE(Safety): Unsafe blocks to use the 'bits' convenience function.
        rcc.ahbenr.modify(|r, w| unsafe { w.bits(r.bits() | CRCEN) });
        crc.init.write(|w| unsafe { w.bits(0xFFFF_FFFF) });
        crc.cr.write(|w| unsafe { w.bits(cr::REV_IN_BYTE | cr::REV_OUT | cr::RESET) });
        Self { crc }
    }
}

impl Crc32 for HardwareCrc {
    fn reset(&mut self) { self.crc.cr.modify(|r, w| unsafe { w.bits(r.bits() | cr::RESET) }); }

    fn update(&mut self, bytes: &[u8]) {
        let data = self.crc.dr.as_ptr() as *mut u8;
        for byte in bytes {
            // NOTE(Safety): Byte wide writes to DR feed a single byte.
            unsafe { ptr::write_volatile(data, *byte) };
        }
    }

    fn finish(&mut self) -> u32 { !self.crc.dr.read().bits() }
}
