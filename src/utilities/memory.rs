//! Utilities to manipulate generic memory

use core::ops::{Add, Sub};

#[macro_export]
macro_rules! kb {
    ($val:expr) => {
        $val * 1024
    };
}

/// Absolute address in the MCU memory map.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, PartialEq, Eq, Hash)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct Address(pub u32);

impl Add<usize> for Address {
    type Output = Address;
    fn add(self, rhs: usize) -> Self::Output { Address(self.0.wrapping_add(rhs as u32)) }
}

impl Sub<usize> for Address {
    type Output = Address;
    fn sub(self, rhs: usize) -> Self::Output { Address(self.0.saturating_sub(rhs as u32)) }
}

impl Sub<Address> for Address {
    type Output = usize;
    fn sub(self, rhs: Address) -> Self::Output { self.0.saturating_sub(rhs.0) as usize }
}

impl From<Address> for usize {
    fn from(address: Address) -> Self { address.0 as usize }
}

/// Contiguous span of memory with a fixed start and length in bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct Region {
    pub start: Address,
    pub length: usize,
}

impl Region {
    pub const fn new(start: Address, length: usize) -> Self { Self { start, length } }

    /// First address past the end of the region.
    pub fn end(&self) -> Address { self.start + self.length }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address < self.end()
    }

    /// Whether `[offset, offset + length)` lies within the region.
    pub fn fits(&self, offset: usize, length: usize) -> bool {
        offset.checked_add(length).map_or(false, |end| end <= self.length)
    }

    /// Index of the first page and number of pages spanned by the region.
    pub fn pages(&self, flash_base: Address, page_size: usize) -> (u32, u32) {
        let first = (self.start - flash_base) / page_size;
        let count = (self.length + page_size - 1) / page_size;
        (first as u32, count as u32)
    }
}

/// Build time description of where everything lives in flash.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    pub flash_base: Address,
    pub page_size: usize,
    /// Bootloader code region, with the dispatch table at its tail.
    pub bootloader: Region,
    /// Single page holding the metadata record.
    pub metadata: Region,
    pub slots: [Region; 2],
    /// Distance from the end of the bootloader region to the dispatch table.
    pub dispatch_offset: usize,
}

impl MemoryLayout {
    pub fn dispatch_table_address(&self) -> Address { self.bootloader.end() - self.dispatch_offset }
}
