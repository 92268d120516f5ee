use super::error::FakeError;
use crate::{
    hal::flash::{self, PROGRAM_UNIT},
    utilities::memory::Address,
};

/// In-memory NOR flash. Erased bytes read `0xFF`, programming a unit
/// that isn't fully erased fails, and writes require unlocking.
pub struct FakeFlash {
    base: Address,
    page_size: usize,
    data: Vec<u8>,
    locked: bool,
    pub fail_erase: bool,
    pub fail_program: bool,
    /// Programs store the unit with its lowest bit flipped, so the
    /// controller reports success but readback disagrees.
    pub corrupt_program: bool,
    pub erased_pages: Vec<u32>,
    pub programmed_units: usize,
}

impl FakeFlash {
    pub fn new(base: Address, length: usize, page_size: usize) -> FakeFlash {
        FakeFlash {
            base,
            page_size,
            data: vec![0xFF; length],
            locked: true,
            fail_erase: false,
            fail_program: false,
            corrupt_program: false,
            erased_pages: Vec::new(),
            programmed_units: 0,
        }
    }

    /// Raw view of simulated memory, bypassing the controller.
    pub fn bytes(&self, address: Address, length: usize) -> &[u8] {
        let offset = address - self.base;
        &self.data[offset..offset + length]
    }

    /// Places bytes directly, as a programmer probe would.
    pub fn load(&mut self, address: Address, bytes: &[u8]) {
        let offset = address - self.base;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn snapshot(&self) -> Vec<u8> { self.data.clone() }

    fn offset_of(&self, address: Address, length: usize) -> Result<usize, FakeError> {
        if address < self.base {
            return Err(FakeError::OutOfBounds);
        }
        let offset = address - self.base;
        match offset.checked_add(length) {
            Some(end) if end <= self.data.len() => Ok(offset),
            _ => Err(FakeError::OutOfBounds),
        }
    }
}

impl flash::ErrorType for FakeFlash {
    type Error = FakeError;
}

impl flash::Read for FakeFlash {
    fn read(&mut self, address: Address, bytes: &mut [u8]) -> nb::Result<(), Self::Error> {
        let offset = self.offset_of(address, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }
}

impl flash::Erase for FakeFlash {
    fn erase(&mut self, first_page: u32, page_count: u32) -> nb::Result<(), Self::Error> {
        if self.locked {
            return Err(nb::Error::Other(FakeError::Locked));
        }
        if self.fail_erase {
            return Err(nb::Error::Other(FakeError::Injected));
        }
        let start = first_page as usize * self.page_size;
        let length = page_count as usize * self.page_size;
        let offset = self.offset_of(self.base + start, length)?;
        self.data[offset..offset + length].iter_mut().for_each(|b| *b = 0xFF);
        self.erased_pages.extend(first_page..first_page + page_count);
        Ok(())
    }
}

impl flash::Program for FakeFlash {
    fn program(&mut self, address: Address, unit: u64) -> nb::Result<(), Self::Error> {
        if self.locked {
            return Err(nb::Error::Other(FakeError::Locked));
        }
        if self.fail_program {
            return Err(nb::Error::Other(FakeError::Injected));
        }
        if (address - self.base) % PROGRAM_UNIT != 0 {
            return Err(nb::Error::Other(FakeError::Misaligned));
        }
        let offset = self.offset_of(address, PROGRAM_UNIT)?;
        let target = &mut self.data[offset..offset + PROGRAM_UNIT];
        if target.iter().any(|b| *b != 0xFF) {
            return Err(nb::Error::Other(FakeError::NotErased));
        }
        let unit = if self.corrupt_program { unit ^ 1 } else { unit };
        target.copy_from_slice(&unit.to_le_bytes());
        self.programmed_units += 1;
        Ok(())
    }
}

impl flash::Lock for FakeFlash {
    fn unlock(&mut self) -> nb::Result<(), Self::Error> {
        self.locked = false;
        Ok(())
    }
    fn lock(&mut self) { self.locked = true; }
    fn is_locked(&self) -> bool { self.locked }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::flash::{Erase, Lock, Program, Read};

    #[test]
    fn programming_requires_erased_memory() {
        // Given
        let mut flash = FakeFlash::new(Address(0x1000), kb!(4), 2048);
        flash.unlock().unwrap();
        flash.program(Address(0x1008), 0x0123_4567_89AB_CDEF).unwrap();

        // When
        let second = flash.program(Address(0x1008), 0);

        // Then
        assert_eq!(second, Err(nb::Error::Other(FakeError::NotErased)));
        flash.erase(0, 1).unwrap();
        flash.program(Address(0x1008), 0).unwrap();
        let mut bytes = [0xAAu8; 8];
        flash.read(Address(0x1008), &mut bytes).unwrap();
        assert_eq!(bytes, [0u8; 8]);
    }

    #[test]
    fn locked_controller_rejects_writes() {
        let mut flash = FakeFlash::new(Address(0x1000), kb!(4), 2048);
        assert_eq!(flash.erase(0, 1), Err(nb::Error::Other(FakeError::Locked)));
        assert_eq!(flash.program(Address(0x1000), 0), Err(nb::Error::Other(FakeError::Locked)));
    }

    #[test]
    fn corrupted_programs_read_back_differently() {
        let mut flash = FakeFlash::new(Address(0x1000), kb!(4), 2048);
        flash.unlock().unwrap();
        flash.corrupt_program = true;
        flash.program(Address(0x1000), 0x10).unwrap();
        assert_eq!(flash.bytes(Address(0x1000), 8), &0x11u64.to_le_bytes());
    }
}
