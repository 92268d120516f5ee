#![cfg_attr(test, allow(unused_attributes))]
#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

#[allow(unused_imports)]
use cortex_m_rt::entry;

#[cfg(not(test))]
#[entry]
fn main() -> ! {
    use twinboot_lib::ports::bootloader::McuBootloader;
    McuBootloader::take().run()
}
