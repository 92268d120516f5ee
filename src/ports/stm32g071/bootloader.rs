//! Bootloader construction for the STM32G071.
use crate::{
    devices::bootloader::Bootloader,
    drivers::stm32g0::{
        crc::HardwareCrc,
        flash::McuFlash,
        iwdg::IndependentWatchdog,
        rcc::ResetStatus,
    },
    ports::layout::LAYOUT,
    stm32pac,
    utilities::memory::Region,
};

pub type McuBootloader = Bootloader<McuFlash, HardwareCrc, IndependentWatchdog, ResetStatus>;

/// Span of on chip flash the controller may touch: everything from the
/// flash base to the end of the last slot.
pub fn flash_range() -> Region {
    let end = LAYOUT.slots[1].end();
    Region::new(LAYOUT.flash_base, end - LAYOUT.flash_base)
}

impl McuBootloader {
    /// Builds the bootloader out of the MCU peripherals. Must only be
    /// called once, at the start of `main`.
    pub fn take() -> Self {
        let mut peripherals =
            stm32pac::Peripherals::take().expect("Peripherals taken before the bootloader");

        let flash = McuFlash::new(peripherals.FLASH, flash_range());
        let crc = HardwareCrc::new(peripherals.CRC, &mut peripherals.RCC);
        let watchdog = IndependentWatchdog::new(peripherals.IWDG);
        let reset_flags = ResetStatus::new(peripherals.RCC);

        // The table is only ever reached through its address, so it
        // needs a reference to survive in the final image.
        let table = core::hint::black_box(&super::dispatch::DISPATCH_TABLE);
        debug!("Dispatch table at {:#x}", table as *const _ as u32);

        Bootloader::new(&LAYOUT, flash, crc, watchdog, reset_flags)
    }
}
