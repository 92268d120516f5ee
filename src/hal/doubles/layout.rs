use super::flash::FakeFlash;
use crate::utilities::memory::{Address, MemoryLayout, Region};

/// The STM32G071RB layout, mirrored for host tests.
pub const LAYOUT: MemoryLayout = MemoryLayout {
    flash_base: Address(0x0800_0000),
    page_size: 2048,
    bootloader: Region::new(Address(0x0800_0000), 0x3800),
    metadata: Region::new(Address(0x0800_3800), 0x800),
    slots: [
        Region::new(Address(0x0800_4000), 0xE000),
        Region::new(Address(0x0801_2000), 0xE000),
    ],
    dispatch_offset: 0x100,
};

/// Blank flash covering the whole of [`LAYOUT`].
pub fn fake_flash() -> FakeFlash { FakeFlash::new(LAYOUT.flash_base, kb!(128), LAYOUT.page_size) }
