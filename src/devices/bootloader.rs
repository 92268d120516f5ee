//! Generic Bootloader.
//!
//! This module contains the per boot decision procedure, with
//! the exception of how to construct one. Construction is
//! handled by the `port` module as it depends on board
//! specific information.
use super::{
    image::ImageStore,
    metadata::{BootloaderMetadata, MetadataStore, Slot},
    safety_net::SafetyNet,
    selection, verification,
};
use crate::{
    error::Error,
    hal::{
        crc::Crc32,
        flash,
        reset::{ResetCause, ResetFlags},
        watchdog::Watchdog,
    },
    utilities::memory::MemoryLayout,
};

pub struct Bootloader<F, C, W, R>
where
    F: flash::ReadWrite,
    C: Crc32,
    W: Watchdog,
    R: ResetFlags,
{
    pub(crate) flash: F,
    pub(crate) crc: C,
    pub(crate) safety_net: SafetyNet<W>,
    pub(crate) reset_flags: R,
    pub(crate) layout: MemoryLayout,
}

impl<F, C, W, R> Bootloader<F, C, W, R>
where
    F: flash::ReadWrite,
    C: Crc32,
    W: Watchdog,
    R: ResetFlags,
    Error: From<F::Error> + From<W::Error>,
{
    pub fn new(layout: &MemoryLayout, flash: F, crc: C, watchdog: W, reset_flags: R) -> Self {
        Self { flash, crc, safety_net: SafetyNet::new(watchdog), reset_flags, layout: *layout }
    }

    /// Runs one boot cycle's worth of decisions and their persistent
    /// side effects, returning the slot to jump to.
    ///
    /// * Latch and clear the reset cause.
    /// * Initialize or upgrade the metadata record.
    /// * Verify both slots per the configured mode and select one.
    /// * After a watchdog reset, charge a fault to the selected slot
    ///   (the one that was running) and select again.
    /// * Arm the watchdog if anything is going to boot.
    pub fn prepare(&mut self) -> Option<Slot> {
        let cause = self.reset_flags.reset_cause();
        self.reset_flags.clear();
        info!("Reset cause: {:?}", cause);

        let store = MetadataStore::new(&self.layout);
        let mut metadata = self.initialize_metadata(&store);

        let verdict =
            verification::verify(&mut self.flash, &mut self.crc, &self.layout, &metadata);
        let mut selected = selection::select(&metadata, &verdict);

        if let (ResetCause::WatchdogTimeout, Some(slot)) = (cause, selected) {
            match self.safety_net.record_fault(&mut self.flash, &store, slot) {
                Ok(count) => {
                    metadata.slot_mut(slot).fault_count = count;
                    selected = selection::select(&metadata, &verdict);
                }
                Err(e) => e.report(),
            }
        }

        match selected {
            Some(slot) => {
                info!("Selected slot {}", slot.number());
                if let Err(e) = self.safety_net.arm(metadata.watchdog_mode) {
                    e.report();
                }
            }
            None => warn!("No bootable image"),
        }
        selected
    }

    /// Falls back to an in-memory default record when flash can't be
    /// initialized, which selects nothing.
    fn initialize_metadata(&mut self, store: &MetadataStore) -> BootloaderMetadata {
        match store.initialize(&mut self.flash) {
            Ok(metadata) => metadata,
            Err(e) => {
                e.report();
                BootloaderMetadata::default()
            }
        }
    }

    pub fn image(&self, slot: Slot) -> ImageStore { ImageStore::new(&self.layout, slot) }

    /// Releases the owned peripherals.
    pub fn release(self) -> (F, C, W, R) {
        (self.flash, self.crc, self.safety_net.into_inner(), self.reset_flags)
    }

    /// Main bootloader routine. Jumps to the selected image, or halts
    /// if there is none.
    #[cfg(target_arch = "arm")]
    pub fn run(mut self) -> ! {
        info!("-- Bootloader initialised --");
        if let Some(slot) = self.prepare() {
            let image = self.image(slot);
            match image.entry_point(&mut self.flash) {
                Ok(entry) => {
                    warn!("Jumping to slot {}. This will break `defmt`.", slot.number());
                    // NOTE(Safety): The selected slot passed every configured check,
                    // and nothing of the bootloader is used past this point.
                    unsafe { crate::drivers::cortex_m::transfer_control(image.region().start, entry) }
                }
                Err(e) => e.report(),
            }
        }
        crate::drivers::cortex_m::halt()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::metadata::{AppInfo, SlotRecord, WatchdogMode},
        drivers::crc::SoftwareCrc,
        hal::{
            doubles::{
                flash::FakeFlash,
                layout::{fake_flash, LAYOUT},
                reset::FakeResetFlags,
                watchdog::FakeWatchdog,
            },
            watchdog::Prescaler,
        },
    };

    type TestBootloader = Bootloader<FakeFlash, SoftwareCrc, FakeWatchdog, FakeResetFlags>;

    fn bootloader(flash: FakeFlash, cause: ResetCause) -> TestBootloader {
        Bootloader::new(
            &LAYOUT,
            flash,
            SoftwareCrc::new(),
            FakeWatchdog::default(),
            FakeResetFlags::new(cause),
        )
    }

    fn with_metadata(metadata: BootloaderMetadata) -> FakeFlash {
        let mut flash = fake_flash();
        MetadataStore::new(&LAYOUT).store(&mut flash, &metadata).unwrap();
        flash
    }

    fn installed(id: u32, version: u32, fault_count: u8) -> SlotRecord {
        SlotRecord {
            info_checksum: 0,
            fault_count,
            info: AppInfo { id, version, size: 1024, ..AppInfo::default() },
        }
    }

    #[test]
    fn blank_device_initializes_and_selects_nothing() {
        // Given
        let mut bootloader = bootloader(fake_flash(), ResetCause::PowerOn);

        // When
        let selected = bootloader.prepare();

        // Then
        assert_eq!(selected, None);
        let stored = MetadataStore::new(&LAYOUT).load(&mut bootloader.flash).unwrap();
        assert_eq!(stored, BootloaderMetadata::default());
        assert!(bootloader.reset_flags.cleared);
        assert!(!bootloader.safety_net.watchdog().is_armed());
    }

    #[test]
    fn watchdog_reset_charges_the_running_slot() {
        // Given
        let metadata = BootloaderMetadata {
            watchdog_mode: WatchdogMode::Medium,
            slots: [SlotRecord::default(), installed(5, 2, 1)],
            ..BootloaderMetadata::default()
        };
        let mut bootloader = bootloader(with_metadata(metadata), ResetCause::WatchdogTimeout);

        // When
        let selected = bootloader.prepare();

        // Then
        assert_eq!(selected, Some(Slot::Two));
        let stored = MetadataStore::new(&LAYOUT).load(&mut bootloader.flash).unwrap();
        assert_eq!(stored.slot(Slot::Two).fault_count, 2);
        assert_eq!(bootloader.safety_net.watchdog().current(), Some((Prescaler::Div256, 640)));
    }

    #[test]
    fn slot_reaching_the_threshold_falls_back_immediately() {
        // Given
        let metadata = BootloaderMetadata {
            slots: [installed(7, 1, 0), installed(7, 2, 2)],
            ..BootloaderMetadata::default()
        };
        let mut bootloader = bootloader(with_metadata(metadata), ResetCause::WatchdogTimeout);

        // When
        let selected = bootloader.prepare();

        // Then
        assert_eq!(selected, Some(Slot::One));
        let stored = MetadataStore::new(&LAYOUT).load(&mut bootloader.flash).unwrap();
        assert_eq!(stored.slot(Slot::Two).fault_count, 3);
        assert_eq!(stored.slot(Slot::One).fault_count, 0);
    }

    #[test]
    fn ordinary_resets_leave_fault_counts_alone() {
        let metadata = BootloaderMetadata {
            slots: [installed(7, 3, 1), installed(7, 5, 0)],
            ..BootloaderMetadata::default()
        };
        let mut bootloader = bootloader(with_metadata(metadata), ResetCause::Pin);
        assert_eq!(bootloader.prepare(), Some(Slot::Two));
        let stored = MetadataStore::new(&LAYOUT).load(&mut bootloader.flash).unwrap();
        assert_eq!(stored, metadata);
    }

    #[test]
    fn failed_verification_excludes_a_slot() {
        // Given
        let metadata = BootloaderMetadata {
            verification_mode: crate::devices::metadata::VerificationMode::InfoOnly,
            slots: [installed(7, 3, 0), installed(7, 5, 0)],
            ..BootloaderMetadata::default()
        };
        let mut bootloader = bootloader(with_metadata(metadata), ResetCause::PowerOn);

        // When
        let selected = bootloader.prepare();

        // Then
        assert_eq!(selected, None);
    }
}
