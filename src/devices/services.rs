//! Bootloader services callable by a running application.
//!
//! Every setter is a load, mutate, store cycle on the metadata record;
//! nothing is cached between calls. Slot operations are exposed per
//! slot and map one to one onto dispatch table entries.
use super::{
    image::ImageStore,
    metadata::{AppInfo, BootPriority, MetadataStore, Slot, VerificationMode, WatchdogMode},
    safety_net::SafetyNet,
};
use crate::{
    error::Error,
    hal::{crc::Crc32, flash, watchdog::Watchdog},
    utilities::memory::{MemoryLayout, Region},
};

pub struct Services<F, C, W>
where
    F: flash::ReadWrite,
    C: Crc32,
    W: Watchdog,
{
    pub(crate) flash: F,
    pub(crate) crc: C,
    pub(crate) safety_net: SafetyNet<W>,
    pub(crate) metadata: MetadataStore,
    pub(crate) images: [ImageStore; 2],
}

impl<F, C, W> Services<F, C, W>
where
    F: flash::ReadWrite,
    C: Crc32,
    W: Watchdog,
    Error: From<F::Error> + From<W::Error>,
{
    pub fn new(layout: &MemoryLayout, flash: F, crc: C, watchdog: W) -> Self {
        Self {
            flash,
            crc,
            safety_net: SafetyNet::new(watchdog),
            metadata: MetadataStore::new(layout),
            images: [ImageStore::new(layout, Slot::One), ImageStore::new(layout, Slot::Two)],
        }
    }

    pub fn version(&mut self) -> Result<u32, Error> { Ok(self.metadata.load(&mut self.flash)?.version) }

    pub fn boot_priority(&mut self) -> Result<BootPriority, Error> {
        Ok(self.metadata.load(&mut self.flash)?.boot_priority)
    }

    pub fn set_boot_priority(&mut self, priority: BootPriority) -> Result<(), Error> {
        if !priority.is_recognized() {
            return Err(Error::OutOfRangeFault);
        }
        self.metadata.modify(&mut self.flash, |m| m.boot_priority = priority)?;
        Ok(())
    }

    pub fn verification_mode(&mut self) -> Result<VerificationMode, Error> {
        Ok(self.metadata.load(&mut self.flash)?.verification_mode)
    }

    pub fn set_verification_mode(&mut self, mode: VerificationMode) -> Result<(), Error> {
        if !mode.is_recognized() {
            return Err(Error::OutOfRangeFault);
        }
        self.metadata.modify(&mut self.flash, |m| m.verification_mode = mode)?;
        Ok(())
    }

    pub fn watchdog_mode(&mut self) -> Result<WatchdogMode, Error> {
        Ok(self.metadata.load(&mut self.flash)?.watchdog_mode)
    }

    /// Persists the mode, then reconfigures the watchdog to match.
    pub fn set_watchdog_mode(&mut self, mode: WatchdogMode) -> Result<(), Error> {
        if !mode.is_recognized() {
            return Err(Error::OutOfRangeFault);
        }
        self.metadata.modify(&mut self.flash, |m| m.watchdog_mode = mode)?;
        self.safety_net.arm(mode)
    }

    pub fn reset_watchdog(&mut self) -> Result<(), Error> { self.safety_net.refresh() }

    /// Stretches the watchdog and unlocks flash ahead of an update.
    pub fn enable_programming_mode(&mut self) -> Result<(), Error> {
        let mode = self.watchdog_mode()?;
        self.safety_net.enter_programming_mode(mode)?;
        nb::block!(self.flash.unlock())?;
        Ok(())
    }

    pub fn disable_programming_mode(&mut self) -> Result<(), Error> {
        self.flash.lock();
        let mode = self.watchdog_mode()?;
        self.safety_net.exit_programming_mode(mode)
    }

    pub fn fault_count(&mut self, slot: Slot) -> Result<u8, Error> {
        Ok(self.metadata.load(&mut self.flash)?.slot(slot).fault_count)
    }

    pub fn reset_fault_count(&mut self, slot: Slot) -> Result<(), Error> {
        self.metadata.modify(&mut self.flash, |m| m.slot_mut(slot).fault_count = 0)?;
        Ok(())
    }

    pub fn info(&mut self, slot: Slot) -> Result<AppInfo, Error> {
        Ok(self.metadata.load(&mut self.flash)?.slot(slot).info)
    }

    /// Flash region backing `slot`.
    pub fn slot_region(&self, slot: Slot) -> Region { self.images[slot.index()].region() }

    pub fn erase(&mut self, slot: Slot) -> Result<(), Error> {
        self.images[slot.index()].erase(&mut self.flash)
    }

    /// Programs whole units `offset` bytes into the slot.
    pub fn write(&mut self, slot: Slot, offset: usize, units: &[u64]) -> Result<(), Error> {
        self.images[slot.index()].write(&mut self.flash, offset, units)
    }

    pub fn write_info(&mut self, slot: Slot, info: AppInfo) -> Result<(), Error> {
        self.images[slot.index()].write_info(&mut self.flash, &mut self.crc, &self.metadata, info)
    }

    /// Releases the owned peripherals.
    pub fn release(self) -> (F, C, W) { (self.flash, self.crc, self.safety_net.into_inner()) }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::verification,
        drivers::crc::SoftwareCrc,
        hal::{
            doubles::{
                flash::FakeFlash,
                layout::{fake_flash, LAYOUT},
                watchdog::FakeWatchdog,
            },
            flash::Lock,
            watchdog::Prescaler,
        },
    };

    fn services() -> Services<FakeFlash, SoftwareCrc, FakeWatchdog> {
        let mut flash = fake_flash();
        MetadataStore::new(&LAYOUT).initialize(&mut flash).unwrap();
        Services::new(&LAYOUT, flash, SoftwareCrc::new(), FakeWatchdog::default())
    }

    #[test]
    fn setters_persist_through_the_record() {
        // Given
        let mut services = services();

        // When
        services.set_boot_priority(BootPriority::Slot2).unwrap();
        services.set_verification_mode(VerificationMode::Full).unwrap();

        // Then
        assert_eq!(services.boot_priority().unwrap(), BootPriority::Slot2);
        assert_eq!(services.verification_mode().unwrap(), VerificationMode::Full);
        assert_eq!(services.watchdog_mode().unwrap(), WatchdogMode::Off);
        assert_eq!(services.version().unwrap(), 1);
    }

    #[test]
    fn setting_watchdog_mode_persists_and_reconfigures() {
        // Given
        let mut services = services();

        // When
        services.set_watchdog_mode(WatchdogMode::Medium).unwrap();

        // Then
        assert_eq!(services.watchdog_mode().unwrap(), WatchdogMode::Medium);
        assert_eq!(services.verification_mode().unwrap(), VerificationMode::Off);
        let (_, _, watchdog) = services.release();
        assert_eq!(watchdog.current(), Some((Prescaler::Div256, 640)));
    }

    #[test]
    fn unrecognized_values_are_rejected() {
        let mut services = services();
        assert_eq!(
            services.set_boot_priority(BootPriority::Unrecognized(3)),
            Err(Error::OutOfRangeFault)
        );
        assert_eq!(
            services.set_watchdog_mode(WatchdogMode::Unrecognized(4)),
            Err(Error::OutOfRangeFault)
        );
        assert_eq!(
            services.set_verification_mode(VerificationMode::Unrecognized(5)),
            Err(Error::OutOfRangeFault)
        );
        assert_eq!(services.boot_priority().unwrap(), BootPriority::Automatic);
    }

    #[test]
    fn programming_mode_brackets_flash_unlock() {
        // Given
        let mut services = services();
        services.set_watchdog_mode(WatchdogMode::Short).unwrap();

        // When
        services.enable_programming_mode().unwrap();
        let unlocked = !services.flash.is_locked();
        let stretched = services.safety_net.watchdog().current();
        services.disable_programming_mode().unwrap();

        // Then
        assert!(unlocked);
        assert_eq!(stretched, Some((Prescaler::Div256, 3840)));
        assert!(services.flash.is_locked());
        assert_eq!(services.safety_net.watchdog().current(), Some((Prescaler::Div32, 512)));
    }

    #[test]
    fn installing_an_image_end_to_end() {
        // Given
        let mut services = services();
        let image: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let units: Vec<u64> = image
            .chunks(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        let mut crc = SoftwareCrc::new();
        let info = AppInfo {
            id: 9,
            version: 4,
            size: image.len() as u32,
            vector_table_checksum: crc.checksum(&image[..verification::VECTOR_TABLE_SIZE]),
            app_checksum: crc.checksum(&image),
        };
        services.set_verification_mode(VerificationMode::Full).unwrap();

        // When
        services.enable_programming_mode().unwrap();
        services.erase(Slot::Two).unwrap();
        services.write(Slot::Two, 0, &units[..64]).unwrap();
        services.write(Slot::Two, 512, &units[64..]).unwrap();
        services.write_info(Slot::Two, info).unwrap();
        services.disable_programming_mode().unwrap();

        // Then
        assert_eq!(services.info(Slot::Two).unwrap(), info);
        let metadata = services.metadata.load(&mut services.flash).unwrap();
        let verdict =
            verification::verify(&mut services.flash, &mut services.crc, &LAYOUT, &metadata);
        assert!(verdict.passed(Slot::Two));
    }

    #[test]
    fn fault_count_can_be_cleared_by_the_operator() {
        let mut services = services();
        services.metadata.modify(&mut services.flash, |m| m.slots[0].fault_count = 3).unwrap();
        assert_eq!(services.fault_count(Slot::One).unwrap(), 3);
        services.reset_fault_count(Slot::One).unwrap();
        assert_eq!(services.fault_count(Slot::One).unwrap(), 0);
    }
}
