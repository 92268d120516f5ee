use crate::{
    error::{Convertible, Error},
    hal::watchdog::{Prescaler, Watchdog},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FakeWatchdogError;

impl Convertible for FakeWatchdogError {
    fn into(self) -> Error { Error::DriverError("A fake watchdog error occurred [TESTING ONLY]") }
}

/// Records every configuration and refresh it receives.
#[derive(Default, Debug)]
pub struct FakeWatchdog {
    pub configurations: Vec<(Prescaler, u16)>,
    pub refreshes: usize,
    pub fail: bool,
}

impl FakeWatchdog {
    pub fn is_armed(&self) -> bool { !self.configurations.is_empty() }
    pub fn current(&self) -> Option<(Prescaler, u16)> { self.configurations.last().copied() }
}

impl Watchdog for FakeWatchdog {
    type Error = FakeWatchdogError;

    fn init(&mut self, prescaler: Prescaler, reload: u16) -> Result<(), Self::Error> {
        if self.fail {
            return Err(FakeWatchdogError);
        }
        self.configurations.push((prescaler, reload));
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), Self::Error> {
        if self.fail {
            return Err(FakeWatchdogError);
        }
        self.refreshes += 1;
        Ok(())
    }
}
