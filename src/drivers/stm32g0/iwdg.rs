//! Independent watchdog, clocked from the ~32kHz LSI.
use crate::{
    error::{Convertible, Error as BootloaderError},
    hal::watchdog::{Prescaler, Watchdog},
    stm32pac::IWDG,
};

mod key {
    pub const START: u32 = 0xCCCC;
    pub const ENABLE_ACCESS: u32 = 0x5555;
    pub const REFRESH: u32 = 0xAAAA;
}

/// Register update flags (PVU, RVU, WVU).
const UPDATE_PENDING: u32 = 0b111;
const UPDATE_ATTEMPTS: u32 = 100_000;
const MAX_RELOAD: u16 = 0x0FFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Error {
    ReloadOutOfRange,
    UpdateTimeout,
}

impl Convertible for Error {
    fn into(self) -> BootloaderError {
        BootloaderError::DriverError(match self {
            Error::ReloadOutOfRange => "Watchdog reload value out of range",
            Error::UpdateTimeout => "Watchdog register update timed out",
        })
    }
}

fn prescaler_code(prescaler: Prescaler) -> u32 {
    match prescaler {
        Prescaler::Div4 => 0,
        Prescaler::Div8 => 1,
        Prescaler::Div16 => 2,
        Prescaler::Div32 => 3,
        Prescaler::Div64 => 4,
        Prescaler::Div128 => 5,
        Prescaler::Div256 => 6,
    }
}

pub struct IndependentWatchdog {
    iwdg: IWDG,
}

impl IndependentWatchdog {
    pub fn new(iwdg: IWDG) -> Self { Self { iwdg } }

    fn key(&mut self, key: u32) {
        // NOTE(Safety): Unsafe block to use the 'bits' convenience function.
        // Applies to all blocks in this file unless specified otherwise
        self.iwdg.kr.write(|w| unsafe { w.bits(key) });
    }
}

impl Watchdog for IndependentWatchdog {
    type Error = Error;

    fn init(&mut self, prescaler: Prescaler, reload: u16) -> Result<(), Self::Error> {
        if reload > MAX_RELOAD {
            return Err(Error::ReloadOutOfRange);
        }
        self.key(key::START);
        self.key(key::ENABLE_ACCESS);
        self.iwdg.pr.write(|w| unsafe { w.bits(prescaler_code(prescaler)) });
        self.iwdg.rlr.write(|w| unsafe { w.bits(reload as u32) });
        let settled =
            (0..UPDATE_ATTEMPTS).any(|_| self.iwdg.sr.read().bits() & UPDATE_PENDING == 0);
        if !settled {
            return Err(Error::UpdateTimeout);
        }
        self.key(key::REFRESH);
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), Self::Error> {
        self.key(key::REFRESH);
        Ok(())
    }
}
