//! Erase, program and verify primitives shared by the metadata
//! and image stores.
use crate::{
    error::Error,
    hal::flash::{self, PROGRAM_UNIT},
    utilities::{
        guard::Guard,
        memory::{Address, MemoryLayout, Region},
    },
};
use nb::block;

/// Runs `operation` with the flash controller unlocked. If the
/// controller was locked on entry it is relocked on every exit path.
pub fn with_unlocked<F, T, O>(flash: &mut F, operation: O) -> Result<T, Error>
where
    F: flash::ReadWrite,
    Error: From<F::Error>,
    O: FnOnce(&mut F) -> Result<T, Error>,
{
    let was_locked = flash.is_locked();
    if was_locked {
        block!(flash.unlock())?;
    }
    let mut guard = Guard::new(flash, |_| {}, move |flash: &mut F| {
        if was_locked {
            flash.lock();
        }
    });
    operation(&mut *guard)
}

/// Erases every page spanned by `region`.
pub fn erase_region<F>(flash: &mut F, layout: &MemoryLayout, region: &Region) -> Result<(), Error>
where
    F: flash::Erase,
    Error: From<F::Error>,
{
    let (first_page, page_count) = region.pages(layout.flash_base, layout.page_size);
    block!(flash.erase(first_page, page_count))?;
    Ok(())
}

/// Programs one unit and reads it back.
pub fn program_unit<F>(flash: &mut F, address: Address, unit: u64) -> Result<(), Error>
where
    F: flash::Read + flash::Program,
    Error: From<F::Error>,
{
    block!(flash.program(address, unit))?;
    let mut readback = [0u8; PROGRAM_UNIT];
    block!(flash.read(address, &mut readback))?;
    if u64::from_le_bytes(readback) == unit {
        Ok(())
    } else {
        Err(Error::WriteVerificationFault)
    }
}

/// Programs a byte buffer unit by unit, zero padding the final
/// partial unit.
pub fn program_bytes<F>(flash: &mut F, address: Address, bytes: &[u8]) -> Result<(), Error>
where
    F: flash::Read + flash::Program,
    Error: From<F::Error>,
{
    for (index, chunk) in bytes.chunks(PROGRAM_UNIT).enumerate() {
        let mut unit = [0u8; PROGRAM_UNIT];
        unit[..chunk.len()].copy_from_slice(chunk);
        program_unit(flash, address + index * PROGRAM_UNIT, u64::from_le_bytes(unit))?;
    }
    Ok(())
}
