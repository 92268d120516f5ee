//! Error types for the bootloader as a whole.

/// Top level error type. Every mutating bootloader operation
/// reports one of these rather than failing silently; callers
/// decide whether to retry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Error {
    /// The memory controller rejected an erase or program operation.
    MemoryFault,
    /// Data read back after programming differs from what was written.
    WriteVerificationFault,
    /// Offset not aligned to the minimum program unit.
    AlignmentFault,
    /// Access would fall outside the target region, or a value is not
    /// a member of its enumeration.
    OutOfRangeFault,
    /// Reserved for service calls with no implementation.
    NotImplementedFault,
    /// Error caused by a low level peripheral driver other than flash.
    DriverError(&'static str),
}

/// Implemented by driver level errors so they can be
/// lifted into the top level [`Error`] with `?`.
pub trait Convertible {
    fn into(self) -> Error;
}

impl<T: Convertible> From<T> for Error {
    fn from(t: T) -> Self { t.into() }
}

impl Error {
    /// Reports the error through the logging backend.
    pub fn report(&self) {
        match self {
            Error::MemoryFault => crate::error!("[Memory Fault] -> Flash controller rejected operation"),
            Error::WriteVerificationFault => {
                crate::error!("[Write Verification Fault] -> Readback mismatch")
            }
            Error::AlignmentFault => crate::error!("[Alignment Fault] -> Offset not 8 byte aligned"),
            Error::OutOfRangeFault => crate::error!("[Out Of Range Fault] -> Access out of bounds"),
            Error::NotImplementedFault => crate::error!("[Not Implemented Fault]"),
            Error::DriverError(text) => crate::error!("[Driver Error] -> {}", text),
        }
    }
}
