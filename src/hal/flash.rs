//! Interfaces to non-volatile memory.
//!
//! The model is NOR flash: memory must be erased (to `0xFF`) one page
//! at a time before it can be programmed, and programming happens in
//! aligned units of [`PROGRAM_UNIT`] bytes.
use crate::utilities::memory::Address;
use core::fmt;

/// Minimum program granularity in bytes (one double word).
pub const PROGRAM_UNIT: usize = 8;

pub trait ErrorType {
    type Error: Clone + Copy + fmt::Debug;
}

/// Reads a range of bytes at an absolute address.
pub trait Read: ErrorType {
    fn read(&mut self, address: Address, bytes: &mut [u8]) -> nb::Result<(), Self::Error>;
}

/// Erases `page_count` pages starting at page index `first_page`.
pub trait Erase: ErrorType {
    fn erase(&mut self, first_page: u32, page_count: u32) -> nb::Result<(), Self::Error>;
}

/// Programs a single aligned unit at an absolute address.
pub trait Program: ErrorType {
    fn program(&mut self, address: Address, unit: u64) -> nb::Result<(), Self::Error>;
}

/// Write protection bracket of the memory controller.
pub trait Lock: ErrorType {
    fn unlock(&mut self) -> nb::Result<(), Self::Error>;
    fn lock(&mut self);
    fn is_locked(&self) -> bool;
}

pub trait ReadWrite: Read + Erase + Program + Lock {}
impl<F> ReadWrite for F where F: Read + Erase + Program + Lock {}
