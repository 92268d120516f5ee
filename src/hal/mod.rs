//! Hardware Abstraction Layer, containing interfaces
//! for low level drivers.

pub mod flash;
pub mod crc;
pub mod watchdog;
pub mod reset;

#[cfg(not(target_arch = "arm"))]
#[doc(hidden)]
pub mod doubles;
