//! Fault counting and watchdog management.
//!
//! The watchdog is the bootloader's only way of noticing that an
//! application hung. When a boot follows a watchdog reset, the slot
//! selected on this boot (the one that was running) is charged one
//! fault; three faults disqualify it.
use super::metadata::{MetadataStore, Slot, WatchdogMode};
use crate::{
    error::Error,
    hal::{
        flash,
        watchdog::{Prescaler, Watchdog},
    },
};

impl WatchdogMode {
    /// Prescaler and reload for this tier, assuming a ~32kHz oscillator.
    /// `None` leaves the watchdog unarmed.
    pub fn timeout(self) -> Option<(Prescaler, u16)> {
        match self {
            WatchdogMode::Long => Some((Prescaler::Div256, 3840)),
            WatchdogMode::Medium => Some((Prescaler::Div256, 640)),
            WatchdogMode::Short => Some((Prescaler::Div32, 512)),
            WatchdogMode::Off | WatchdogMode::Unrecognized(_) => None,
        }
    }

    /// Approximate timeout in milliseconds.
    pub fn timeout_ms(self) -> Option<u32> {
        const LSI_HZ: u32 = 32_000;
        self.timeout()
            .map(|(prescaler, reload)| prescaler.divider() * reload as u32 * 1000 / LSI_HZ)
    }
}

pub struct SafetyNet<W: Watchdog> {
    watchdog: W,
}

impl<W: Watchdog> SafetyNet<W>
where
    Error: From<W::Error>,
{
    pub fn new(watchdog: W) -> Self { Self { watchdog } }

    /// Configures the watchdog for `mode`. `Off` leaves it as it is,
    /// since a started watchdog can't be stopped.
    pub fn arm(&mut self, mode: WatchdogMode) -> Result<(), Error> {
        match mode.timeout() {
            Some((prescaler, reload)) => {
                info!("Arming watchdog ({:?}, ~{}ms)", mode, mode.timeout_ms().unwrap_or(0));
                self.watchdog.init(prescaler, reload)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn refresh(&mut self) -> Result<(), Error> {
        self.watchdog.refresh()?;
        Ok(())
    }

    /// Stretches the timeout to the longest tier so slow erase and
    /// program cycles don't trip it.
    pub fn enter_programming_mode(&mut self, mode: WatchdogMode) -> Result<(), Error> {
        if mode != WatchdogMode::Off {
            self.arm(WatchdogMode::Long)?;
            self.refresh()?;
        }
        Ok(())
    }

    /// Restores the configured tier after programming.
    pub fn exit_programming_mode(&mut self, mode: WatchdogMode) -> Result<(), Error> {
        self.arm(mode)
    }

    /// Charges `slot` with one fault and persists it.
    pub fn record_fault<F>(
        &mut self,
        flash: &mut F,
        metadata: &MetadataStore,
        slot: Slot,
    ) -> Result<u8, Error>
    where
        F: flash::ReadWrite,
        Error: From<F::Error>,
    {
        let updated = metadata.modify(flash, |m| {
            let record = m.slot_mut(slot);
            record.fault_count = record.fault_count.saturating_add(1);
        })?;
        let count = updated.slot(slot).fault_count;
        warn!("Watchdog reset charged to slot {} ({} faults)", slot.number(), count);
        Ok(count)
    }

    pub fn watchdog(&self) -> &W { &self.watchdog }
    pub fn into_inner(self) -> W { self.watchdog }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::doubles::{
        layout::{fake_flash, LAYOUT},
        watchdog::FakeWatchdog,
    };

    #[test]
    fn tiers_map_to_expected_timeouts() {
        assert_eq!(WatchdogMode::Long.timeout_ms(), Some(30_720));
        assert_eq!(WatchdogMode::Medium.timeout_ms(), Some(5_120));
        assert_eq!(WatchdogMode::Short.timeout_ms(), Some(512));
        assert_eq!(WatchdogMode::Off.timeout(), None);
        assert_eq!(WatchdogMode::Unrecognized(8).timeout(), None);
    }

    #[test]
    fn off_mode_leaves_watchdog_unarmed() {
        let mut net = SafetyNet::new(FakeWatchdog::default());
        net.arm(WatchdogMode::Off).unwrap();
        net.enter_programming_mode(WatchdogMode::Off).unwrap();
        assert!(!net.watchdog().is_armed());
        assert_eq!(net.watchdog().refreshes, 0);
    }

    #[test]
    fn programming_mode_stretches_then_restores_timeout() {
        // Given
        let mut net = SafetyNet::new(FakeWatchdog::default());
        net.arm(WatchdogMode::Short).unwrap();

        // When
        net.enter_programming_mode(WatchdogMode::Short).unwrap();
        let during = net.watchdog().current();
        net.exit_programming_mode(WatchdogMode::Short).unwrap();

        // Then
        assert_eq!(during, Some((Prescaler::Div256, 3840)));
        assert_eq!(net.watchdog().current(), Some((Prescaler::Div32, 512)));
        assert_eq!(net.watchdog().refreshes, 1);
    }

    #[test]
    fn recorded_fault_is_persisted_and_saturates() {
        // Given
        let mut flash = fake_flash();
        let metadata = MetadataStore::new(&LAYOUT);
        metadata.initialize(&mut flash).unwrap();
        let mut net = SafetyNet::new(FakeWatchdog::default());

        // When
        let first = net.record_fault(&mut flash, &metadata, Slot::Two).unwrap();
        metadata.modify(&mut flash, |m| m.slot_mut(Slot::Two).fault_count = u8::MAX).unwrap();
        let saturated = net.record_fault(&mut flash, &metadata, Slot::Two).unwrap();

        // Then
        assert_eq!(first, 1);
        assert_eq!(saturated, u8::MAX);
        assert_eq!(metadata.load(&mut flash).unwrap().slot(Slot::One).fault_count, 0);
    }

    #[test]
    fn watchdog_failures_surface_as_driver_errors() {
        let mut net = SafetyNet::new(FakeWatchdog { fail: true, ..FakeWatchdog::default() });
        assert!(matches!(net.arm(WatchdogMode::Medium), Err(Error::DriverError(_))));
    }
}
