//! Checksum verification of installed images.
//!
//! All checks use the same CRC-32 (see [`crate::hal::crc`]): the
//! descriptor check over the 20 little endian bytes of [`AppInfo`],
//! and the image checks over raw slot bytes.
use super::metadata::{AppInfo, BootloaderMetadata, Slot, VerificationMode};
use crate::{
    error::Error,
    hal::{crc::Crc32, flash},
    utilities::memory::{Address, MemoryLayout},
};
use nb::block;

/// Words of vector table covered by the vector table check.
pub const VECTOR_TABLE_WORDS: usize = 47;
pub const VECTOR_TABLE_SIZE: usize = VECTOR_TABLE_WORDS * 4;

/// Outcome of one verification pass over both slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct Verdict {
    passed: [bool; 2],
}

impl Verdict {
    pub fn new(slot_one: bool, slot_two: bool) -> Self { Self { passed: [slot_one, slot_two] } }
    pub fn all_passed() -> Self { Self::new(true, true) }
    pub fn passed(&self, slot: Slot) -> bool { self.passed[slot.index()] }
}

pub fn info_checksum<C: Crc32>(crc: &mut C, info: &AppInfo) -> u32 { crc.checksum(&info.to_bytes()) }

/// Checksum of `length` bytes of flash starting at `start`.
pub fn region_checksum<F, C>(
    flash: &mut F,
    crc: &mut C,
    start: Address,
    length: usize,
) -> Result<u32, Error>
where
    F: flash::Read,
    C: Crc32,
    Error: From<F::Error>,
{
    // Generic buffer to hold temporary slices read from flash memory.
    const BUFFER_SIZE: usize = 256;
    let mut buffer = [0u8; BUFFER_SIZE];

    crc.reset();
    let mut offset = 0;
    while offset < length {
        let chunk = &mut buffer[..BUFFER_SIZE.min(length - offset)];
        block!(flash.read(start + offset, chunk))?;
        crc.update(chunk);
        offset += chunk.len();
    }
    Ok(crc.finish())
}

/// Runs the checks selected by the metadata's verification mode
/// against one slot.
pub fn verify_slot<F, C>(
    flash: &mut F,
    crc: &mut C,
    layout: &MemoryLayout,
    metadata: &BootloaderMetadata,
    slot: Slot,
) -> bool
where
    F: flash::Read,
    C: Crc32,
    Error: From<F::Error>,
{
    let (info_check, vector_table_check, application_check) = match metadata.verification_mode {
        VerificationMode::Off => return true,
        VerificationMode::InfoOnly => (true, false, false),
        VerificationMode::VectorTableOnly => (false, true, false),
        VerificationMode::ApplicationOnly => (false, false, true),
        VerificationMode::Full => (true, true, true),
        VerificationMode::Unrecognized(raw) => {
            warn!("Unrecognized verification mode {}, skipping checks", raw);
            return true;
        }
    };

    let record = metadata.slot(slot);
    let info = record.info;
    let region = layout.slots[slot.index()];
    if !info.is_installed() || info.size as usize > region.length {
        return false;
    }

    if info_check && info_checksum(crc, &info) != record.info_checksum {
        warn!("Slot {} failed descriptor check", slot.number());
        return false;
    }

    let mut image_check = |length: usize, expected: u32, name: &str| {
        match region_checksum(flash, crc, region.start, length) {
            Ok(checksum) if checksum == expected => true,
            Ok(_) => {
                warn!("Slot {} failed {} check", slot.number(), name);
                false
            }
            Err(_) => {
                warn!("Slot {} unreadable during {} check", slot.number(), name);
                false
            }
        }
    };

    (!vector_table_check
        || image_check(VECTOR_TABLE_SIZE, info.vector_table_checksum, "vector table"))
        && (!application_check || image_check(info.size as usize, info.app_checksum, "application"))
}

/// Verifies both slots under the metadata's verification mode.
pub fn verify<F, C>(
    flash: &mut F,
    crc: &mut C,
    layout: &MemoryLayout,
    metadata: &BootloaderMetadata,
) -> Verdict
where
    F: flash::Read,
    C: Crc32,
    Error: From<F::Error>,
{
    Verdict::new(
        verify_slot(flash, crc, layout, metadata, Slot::One),
        verify_slot(flash, crc, layout, metadata, Slot::Two),
    )
}
