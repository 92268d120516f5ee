//! Core level control transfer for Cortex-M.
use crate::{devices::image::EntryPoint, utilities::memory::Address};
use cortex_m::peripheral::SCB;

/// Points the vector table at `vector_table`, loads the image's stack
/// pointer and branches to its reset vector.
///
/// # Safety
///
/// `entry` must describe a valid image whose vector table lives at
/// `vector_table`. Control never returns, so nothing borrowed by the
/// caller is used again.
pub unsafe fn transfer_control(vector_table: Address, entry: EntryPoint) -> ! {
    (*SCB::PTR).vtor.write(vector_table.0);
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
    cortex_m::asm::bootstrap(
        entry.stack_pointer as *const u32,
        entry.reset_vector as *const u32,
    )
}

/// Parks the core forever; the fail safe outcome when nothing can boot.
pub fn halt() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
