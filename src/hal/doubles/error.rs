use crate::error::{Convertible, Error};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FakeError {
    /// Access outside the simulated memory.
    OutOfBounds,
    /// Program address not aligned to the program unit.
    Misaligned,
    /// Attempt to program bytes that were not erased first.
    NotErased,
    /// Write attempted while the controller is locked.
    Locked,
    /// Failure injected by the test.
    Injected,
}

impl Convertible for FakeError {
    fn into(self) -> Error { Error::MemoryFault }
}
