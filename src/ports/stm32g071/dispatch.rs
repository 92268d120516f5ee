//! Dispatch table instance for the STM32G071.
//!
//! Entries run on the application's stack and with the application's
//! vector table, long after the bootloader's own peripheral handles
//! are gone. Each call rebuilds the drivers over stolen peripherals.
use crate::{
    devices::services::Services,
    drivers::stm32g0::{crc::HardwareCrc, flash::McuFlash, iwdg::IndependentWatchdog},
    ports::{bootloader::flash_range, layout::LAYOUT},
    stm32pac,
};

pub type McuServices = Services<McuFlash, HardwareCrc, IndependentWatchdog>;

fn with_services<T>(operation: impl FnOnce(&mut McuServices) -> T) -> T {
    // NOTE(Safety): The application calls into the table from a single
    // thread of execution, and no bootloader code holds these
    // peripherals once control has been transferred.
    let mut peripherals = unsafe { stm32pac::Peripherals::steal() };
    let flash = McuFlash::new(peripherals.FLASH, flash_range());
    let crc = HardwareCrc::new(peripherals.CRC, &mut peripherals.RCC);
    let watchdog = IndependentWatchdog::new(peripherals.IWDG);
    let mut services = Services::new(&LAYOUT, flash, crc, watchdog);
    operation(&mut services)
}

dispatch_table!(
    #[used]
    #[link_section = ".dispatch_table"]
    DISPATCH_TABLE,
    with_services
);
