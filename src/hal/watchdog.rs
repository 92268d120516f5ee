//! Independent watchdog interface.
//!
//! Once armed, a watchdog cannot be stopped; it can only be
//! reconfigured or refreshed.
use core::fmt;

/// Clock division applied to the watchdog's oscillator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Prescaler {
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
    Div256,
}

impl Prescaler {
    pub fn divider(self) -> u32 {
        match self {
            Prescaler::Div4 => 4,
            Prescaler::Div8 => 8,
            Prescaler::Div16 => 16,
            Prescaler::Div32 => 32,
            Prescaler::Div64 => 64,
            Prescaler::Div128 => 128,
            Prescaler::Div256 => 256,
        }
    }
}

pub trait Watchdog {
    type Error: Clone + Copy + fmt::Debug;
    /// Starts (or reconfigures) the watchdog with the given timeout.
    fn init(&mut self, prescaler: Prescaler, reload: u16) -> Result<(), Self::Error>;
    /// Reloads the counter, postponing the reset.
    fn refresh(&mut self) -> Result<(), Self::Error>;
}
