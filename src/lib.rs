//! # Dual Image Bootloader Library
//!
//! This crate contains all functionality for the
//! fail safe, dual image bootloader in library form.
#![cfg_attr(test, allow(unused_imports))]
#![cfg_attr(target_arch = "arm", no_std)]

#[cfg(feature = "stm32g071")]
pub use stm32g0::stm32g071 as stm32pac;

#[cfg(target_arch = "arm")]
use defmt_rtt as _;
#[cfg(target_arch = "arm")]
use panic_semihosting as _;
extern crate static_assertions;

#[macro_use]
pub mod utilities {
    #[macro_use]
    mod macros;
    #[macro_use]
    pub mod memory;
    pub mod guard;
}

pub mod hal;
#[macro_use]
pub mod devices;
pub mod drivers;
pub mod ports;
pub mod error;
