//! Reset flags held in RCC_CSR.
use crate::{
    hal::reset::{ResetCause, ResetFlags},
    stm32pac::RCC,
};

const RMVF: u32 = 1 << 23;

/// Flags in the order they're checked. A watchdog reset wins over
/// the pin flag that every reset also sets.
const CAUSES: [(u32, ResetCause); 7] = [
    (1 << 29, ResetCause::WatchdogTimeout),
    (1 << 30, ResetCause::WindowWatchdog),
    (1 << 28, ResetCause::Software),
    (1 << 31, ResetCause::LowPower),
    (1 << 25, ResetCause::OptionByteLoader),
    (1 << 27, ResetCause::PowerOn),
    (1 << 26, ResetCause::Pin),
];

pub fn cause_from_csr(csr: u32) -> ResetCause {
    CAUSES
        .iter()
        .find(|(flag, _)| csr & flag != 0)
        .map_or(ResetCause::Normal, |(_, cause)| *cause)
}

pub struct ResetStatus {
    rcc: RCC,
}

impl ResetStatus {
    pub fn new(rcc: RCC) -> Self { Self { rcc } }
}

impl ResetFlags for ResetStatus {
    fn reset_cause(&self) -> ResetCause { cause_from_csr(self.rcc.csr.read().bits()) }

    fn clear(&mut self) {
        // NOTE(Safety): Unsafe block to use the 'bits' convenience function.
        self.rcc.csr.modify(|r, w| unsafe { w.bits(r.bits() | RMVF) });
    }
}
