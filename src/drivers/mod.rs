//! Driver implementations for all supported platforms.

pub mod crc;

#[cfg(target_arch = "arm")]
pub mod cortex_m;

#[cfg(feature = "stm32g0_any")]
pub mod stm32g0 {
    pub mod crc;
    pub mod flash;
    pub mod iwdg;
    pub mod rcc;
}
