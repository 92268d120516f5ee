//! Internal Flash controller for the STM32G0 family.
//!
//! Single bank, 2KB pages, double word (64 bit) programming.
use crate::{
    error::{Convertible, Error as BootloaderError},
    hal::flash::{self, PROGRAM_UNIT},
    stm32pac::FLASH,
    utilities::memory::{Address, Region},
};
use core::ptr;

pub const PAGE_SIZE: usize = kb!(2);

/// From RM0444 section 3.3.6
const UNLOCK_KEYS: [u32; 2] = [0x45670123, 0xCDEF89AB];

mod cr {
    pub const PG: u32 = 1 << 0;
    pub const PER: u32 = 1 << 1;
    pub const PNB_SHIFT: u32 = 3;
    pub const PNB_MASK: u32 = 0x3F << PNB_SHIFT;
    pub const STRT: u32 = 1 << 16;
    pub const LOCK: u32 = 1 << 31;
}

mod sr {
    pub const EOP: u32 = 1 << 0;
    /// OPERR, PROGERR, WRPERR, PGAERR, SIZERR, PGSERR, MISSERR,
    /// FASTERR, RDERR and OPTVERR.
    pub const ERRORS: u32 = 0xC3FA;
    pub const BSY1: u32 = 1 << 16;
    pub const CFGBSY: u32 = 1 << 18;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Error {
    MemoryNotReachable,
    MisalignedAccess,
    /// Error flags raised by the controller (raw SR bits).
    OperationRejected(u32),
    Locked,
}

impl Convertible for Error {
    fn into(self) -> BootloaderError {
        match self {
            Error::OperationRejected(flags) => {
                crate::warn!("Flash controller rejected operation (SR {:#x})", flags);
                BootloaderError::MemoryFault
            }
            Error::MisalignedAccess => BootloaderError::AlignmentFault,
            Error::MemoryNotReachable => BootloaderError::OutOfRangeFault,
            Error::Locked => BootloaderError::MemoryFault,
        }
    }
}

pub struct McuFlash {
    flash: FLASH,
    range: Region,
}

impl McuFlash {
    pub fn new(flash: FLASH, range: Region) -> Self { Self { flash, range } }

    fn is_busy(&self) -> bool { self.flash.sr.read().bits() & (sr::BSY1 | sr::CFGBSY) != 0 }

    fn wait_until_idle(&self) {
        while self.is_busy() {}
    }

    fn clear_flags(&mut self) {
        // NOTE(Safety): Unsafe block to use the 'bits' convenience function.
        // Applies to all blocks in this file unless specified otherwise
        self.flash.sr.write(|w| unsafe { w.bits(sr::ERRORS | sr::EOP) });
    }

    fn check_flags(&mut self) -> Result<(), Error> {
        let errors = self.flash.sr.read().bits() & sr::ERRORS;
        self.clear_flags();
        if errors == 0 {
            Ok(())
        } else {
            Err(Error::OperationRejected(errors))
        }
    }

    fn reachable(&self, address: Address, length: usize) -> Result<(), Error> {
        if self.range.contains(address) && self.range.fits(address - self.range.start, length) {
            Ok(())
        } else {
            Err(Error::MemoryNotReachable)
        }
    }

    fn erase_page(&mut self, page: u32) -> Result<(), Error> {
        self.wait_until_idle();
        self.clear_flags();
        self.flash.cr.modify(|r, w| unsafe {
            w.bits((r.bits() & !cr::PNB_MASK) | cr::PER | (page << cr::PNB_SHIFT))
        });
        self.flash.cr.modify(|r, w| unsafe { w.bits(r.bits() | cr::STRT) });
        self.wait_until_idle();
        self.flash.cr.modify(|r, w| unsafe { w.bits(r.bits() & !(cr::PER | cr::PNB_MASK)) });
        self.check_flags()
    }
}

impl flash::ErrorType for McuFlash {
    type Error = Error;
}

impl flash::Read for McuFlash {
    fn read(&mut self, address: Address, bytes: &mut [u8]) -> nb::Result<(), Self::Error> {
        self.reachable(address, bytes.len())?;
        let base = address.0 as *const u8;
        for (index, byte) in bytes.iter_mut().enumerate() {
            // NOTE(Safety): The range is memory mapped flash, checked above.
            *byte = unsafe { ptr::read_volatile(base.add(index)) };
        }
        Ok(())
    }
}

impl flash::Erase for McuFlash {
    fn erase(&mut self, first_page: u32, page_count: u32) -> nb::Result<(), Self::Error> {
        if self.is_busy() {
            return Err(nb::Error::WouldBlock);
        }
        if flash::Lock::is_locked(self) {
            return Err(nb::Error::Other(Error::Locked));
        }
        let first = self.range.start + first_page as usize * PAGE_SIZE;
        self.reachable(first, page_count as usize * PAGE_SIZE)?;
        for page in first_page..first_page + page_count {
            self.erase_page(page)?;
        }
        Ok(())
    }
}

impl flash::Program for McuFlash {
    fn program(&mut self, address: Address, unit: u64) -> nb::Result<(), Self::Error> {
        if self.is_busy() {
            return Err(nb::Error::WouldBlock);
        }
        if flash::Lock::is_locked(self) {
            return Err(nb::Error::Other(Error::Locked));
        }
        if address.0 as usize % PROGRAM_UNIT != 0 {
            return Err(nb::Error::Other(Error::MisalignedAccess));
        }
        self.reachable(address, PROGRAM_UNIT)?;

        self.clear_flags();
        self.flash.cr.modify(|r, w| unsafe { w.bits(r.bits() | cr::PG) });
        let words = address.0 as *mut u32;
        // NOTE(Safety): Aligned, in range, and the controller expects the
        // two words back to back with no other flash access in between.
        unsafe {
            ptr::write_volatile(words, unit as u32);
            ptr::write_volatile(words.add(1), (unit >> 32) as u32);
        }
        self.wait_until_idle();
        self.flash.cr.modify(|r, w| unsafe { w.bits(r.bits() & !cr::PG) });
        Ok(self.check_flags()?)
    }
}

impl flash::Lock for McuFlash {
    fn unlock(&mut self) -> nb::Result<(), Self::Error> {
        if self.is_busy() {
            return Err(nb::Error::WouldBlock);
        }
        if flash::Lock::is_locked(self) {
            self.flash.keyr.write(|w| unsafe { w.bits(UNLOCK_KEYS[0]) });
            self.flash.keyr.write(|w| unsafe { w.bits(UNLOCK_KEYS[1]) });
        }
        self.clear_flags();
        Ok(())
    }

    fn lock(&mut self) {
        self.wait_until_idle();
        self.flash.cr.modify(|r, w| unsafe { w.bits(r.bits() | cr::LOCK) });
    }

    fn is_locked(&self) -> bool { self.flash.cr.read().bits() & cr::LOCK != 0 }
}
