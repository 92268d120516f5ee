//! Application image slots.
//!
//! Each slot is a fixed flash region starting with the image's vector
//! table: initial stack pointer, then reset vector.
use super::{
    metadata::{AppInfo, MetadataStore, Slot},
    programming, verification,
};
use crate::{
    error::Error,
    hal::{crc::Crc32, flash, flash::PROGRAM_UNIT},
    utilities::memory::{MemoryLayout, Region},
};
use core::mem::size_of;
use nb::block;

/// First two words of an image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct EntryPoint {
    pub stack_pointer: u32,
    pub reset_vector: u32,
}

/// Erase, write and readback for a single slot.
#[derive(Copy, Clone, Debug)]
pub struct ImageStore {
    slot: Slot,
    layout: MemoryLayout,
}

impl ImageStore {
    pub fn new(layout: &MemoryLayout, slot: Slot) -> Self { Self { slot, layout: *layout } }

    pub fn slot(&self) -> Slot { self.slot }
    pub fn region(&self) -> Region { self.layout.slots[self.slot.index()] }

    /// Erases exactly the pages spanning the slot.
    pub fn erase<F>(&self, flash: &mut F) -> Result<(), Error>
    where
        F: flash::ReadWrite,
        Error: From<F::Error>,
    {
        info!("Erasing slot {}", self.slot.number());
        programming::with_unlocked(flash, |flash| {
            programming::erase_region(flash, &self.layout, &self.region())
        })
    }

    /// Programs `units` starting `offset` bytes into the slot, verifying
    /// each unit after programming. Bounds and alignment are checked
    /// before flash is touched.
    pub fn write<F>(&self, flash: &mut F, offset: usize, units: &[u64]) -> Result<(), Error>
    where
        F: flash::ReadWrite,
        Error: From<F::Error>,
    {
        if offset % PROGRAM_UNIT != 0 {
            return Err(Error::AlignmentFault);
        }
        let length = units.len().checked_mul(PROGRAM_UNIT).ok_or(Error::OutOfRangeFault)?;
        if !self.region().fits(offset, length) {
            return Err(Error::OutOfRangeFault);
        }

        let start = self.region().start + offset;
        programming::with_unlocked(flash, |flash| {
            units.iter().enumerate().try_for_each(|(index, unit)| {
                programming::program_unit(flash, start + index * PROGRAM_UNIT, *unit)
            })
        })
    }

    /// Reads raw image bytes starting `offset` bytes into the slot.
    pub fn read<F>(&self, flash: &mut F, offset: usize, bytes: &mut [u8]) -> Result<(), Error>
    where
        F: flash::Read,
        Error: From<F::Error>,
    {
        if !self.region().fits(offset, bytes.len()) {
            return Err(Error::OutOfRangeFault);
        }
        block!(flash.read(self.region().start + offset, bytes))?;
        Ok(())
    }

    pub fn entry_point<F>(&self, flash: &mut F) -> Result<EntryPoint, Error>
    where
        F: flash::Read,
        Error: From<F::Error>,
    {
        let mut header = [0u8; 2 * size_of::<u32>()];
        self.read(flash, 0, &mut header)?;
        let (stack_pointer, reset_vector) = header.split_at(size_of::<u32>());
        let word = |bytes: &[u8]| {
            let mut word = [0u8; 4];
            word.copy_from_slice(bytes);
            u32::from_le_bytes(word)
        };
        Ok(EntryPoint { stack_pointer: word(stack_pointer), reset_vector: word(reset_vector) })
    }

    /// Records a freshly installed image: stores `info` with its
    /// descriptor checksum and clears the slot's fault history.
    pub fn write_info<F, C>(
        &self,
        flash: &mut F,
        crc: &mut C,
        metadata: &MetadataStore,
        info: AppInfo,
    ) -> Result<(), Error>
    where
        F: flash::ReadWrite,
        C: Crc32,
        Error: From<F::Error>,
    {
        let info_checksum = verification::info_checksum(crc, &info);
        metadata.modify(flash, |m| {
            let record = m.slot_mut(self.slot);
            record.info = info;
            record.info_checksum = info_checksum;
            record.fault_count = 0;
        })?;
        info!("Slot {} descriptor written (id {}, version {})", self.slot.number(), info.id, info.version);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        drivers::crc::SoftwareCrc,
        hal::doubles::layout::{fake_flash, LAYOUT},
    };

    #[test]
    fn written_units_read_back_exactly() {
        // Given
        let mut flash = fake_flash();
        let image = ImageStore::new(&LAYOUT, Slot::Two);
        let units = [0x2000_9000_0801_20C1u64, 0x0123_4567_89AB_CDEF, 0];

        // When
        image.write(&mut flash, 0x40, &units).unwrap();

        // Then
        let mut bytes = [0u8; 24];
        image.read(&mut flash, 0x40, &mut bytes).unwrap();
        let expected: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(&bytes[..], &expected[..]);
        assert!(flash::Lock::is_locked(&flash));
    }

    #[test]
    fn misaligned_write_fails_without_touching_flash() {
        // Given
        let mut flash = fake_flash();
        let image = ImageStore::new(&LAYOUT, Slot::One);
        let before = flash.snapshot();

        // When
        let result = image.write(&mut flash, 4, &[0]);

        // Then
        assert_eq!(result, Err(Error::AlignmentFault));
        assert_eq!(flash.snapshot(), before);
    }

    #[test]
    fn overflowing_write_fails_without_touching_flash() {
        // Given
        let mut flash = fake_flash();
        let image = ImageStore::new(&LAYOUT, Slot::One);
        let before = flash.snapshot();
        let length = LAYOUT.slots[0].length;

        // When
        let past_end = image.write(&mut flash, length - 8, &[0, 0]);
        let huge_offset = image.write(&mut flash, usize::MAX - 7, &[0]);

        // Then
        assert_eq!(past_end, Err(Error::OutOfRangeFault));
        assert_eq!(huge_offset, Err(Error::OutOfRangeFault));
        assert_eq!(flash.snapshot(), before);
        assert_eq!(image.write(&mut flash, length - 8, &[0]), Ok(()));
    }

    #[test]
    fn writing_over_programmed_memory_is_a_memory_fault() {
        let mut flash = fake_flash();
        let image = ImageStore::new(&LAYOUT, Slot::One);
        image.write(&mut flash, 0, &[1]).unwrap();
        assert_eq!(image.write(&mut flash, 0, &[2]), Err(Error::MemoryFault));
    }

    #[test]
    fn corrupted_program_is_a_write_verification_fault() {
        let mut flash = fake_flash();
        flash.corrupt_program = true;
        let image = ImageStore::new(&LAYOUT, Slot::One);
        assert_eq!(image.write(&mut flash, 0, &[0x10]), Err(Error::WriteVerificationFault));
    }

    #[test]
    fn erase_covers_exactly_the_slot_pages() {
        // Given
        let mut flash = fake_flash();
        let image = ImageStore::new(&LAYOUT, Slot::Two);
        image.write(&mut flash, 0, &[0]).unwrap();

        // When
        image.erase(&mut flash).unwrap();

        // Then
        assert_eq!(flash.erased_pages, (36..64).collect::<Vec<u32>>());
        assert!(flash.bytes(LAYOUT.slots[1].start, 8).iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn entry_point_is_the_first_two_words() {
        let mut flash = fake_flash();
        let image = ImageStore::new(&LAYOUT, Slot::One);
        image.write(&mut flash, 0, &[0x0800_40C1_2000_9000]).unwrap();
        let entry = image.entry_point(&mut flash).unwrap();
        assert_eq!(entry, EntryPoint { stack_pointer: 0x2000_9000, reset_vector: 0x0800_40C1 });
    }

    #[test]
    fn writing_info_clears_fault_history() {
        // Given
        let mut flash = fake_flash();
        let mut crc = SoftwareCrc::new();
        let metadata = MetadataStore::new(&LAYOUT);
        metadata.initialize(&mut flash).unwrap();
        metadata.modify(&mut flash, |m| m.slot_mut(Slot::One).fault_count = 2).unwrap();
        let info = AppInfo { id: 7, version: 3, size: 256, ..AppInfo::default() };

        // When
        ImageStore::new(&LAYOUT, Slot::One)
            .write_info(&mut flash, &mut crc, &metadata, info)
            .unwrap();

        // Then
        let record = *metadata.load(&mut flash).unwrap().slot(Slot::One);
        assert_eq!(record.fault_count, 0);
        assert_eq!(record.info, info);
        assert_eq!(record.info_checksum, crc.checksum(&info.to_bytes()));
    }
}
