//! Persistent bootloader metadata.
//!
//! A single 64 byte record lives in its own flash page. It holds the
//! bootloader configuration plus, for each slot, the installed image's
//! descriptor and health counter. The record is the only persistent
//! state the bootloader owns; it is always read fresh from flash and
//! always rewritten in full.
//!
//! # Layout (little endian)
//!
//! | Offset | Size | Field                    |
//! |--------|------|--------------------------|
//! | 0      | 4    | version                  |
//! | 4      | 1    | boot priority            |
//! | 5      | 1    | verification mode        |
//! | 6      | 1    | watchdog mode            |
//! | 7      | 1    | padding (`0x00`)         |
//! | 8      | 28   | slot 1 record            |
//! | 36     | 28   | slot 2 record            |
//!
//! Each slot record is `info_checksum: u32`, `fault_count: u8`, three
//! bytes of padding and a 20 byte [`AppInfo`].
use super::programming;
use crate::{
    error::Error,
    hal::flash,
    utilities::memory::MemoryLayout,
};
use nb::block;
use static_assertions::const_assert_eq;

/// Version of the record layout written by this bootloader.
pub const BOOTLOADER_VERSION: u32 = 1;
pub const METADATA_SIZE: usize = 64;
pub const APP_INFO_SIZE: usize = 20;
const SLOT_RECORD_SIZE: usize = 28;
const SLOT_RECORD_OFFSETS: [usize; 2] = [8, 36];

const_assert_eq!(SLOT_RECORD_OFFSETS[1] + SLOT_RECORD_SIZE, METADATA_SIZE);
const_assert_eq!(core::mem::size_of::<AppInfo>(), APP_INFO_SIZE);

/// Sentinel meaning "no image installed" in the `id` and `size` fields.
const SENTINELS: [u32; 2] = [0x0000_0000, 0xFFFF_FFFF];

/// One of the two application image slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Slot {
    One,
    Two,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::One => 0,
            Slot::Two => 1,
        }
    }
    pub fn number(self) -> u8 { self.index() as u8 + 1 }
}

/// Generates a persisted single byte enumeration. Unrecognized bytes
/// survive a load/store round trip untouched.
macro_rules! persisted_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        #[cfg_attr(target_arch = "arm", derive(defmt::Format))]
        pub enum $name {
            $($variant,)+
            Unrecognized(u8),
        }

        impl $name {
            pub fn from_raw(raw: u8) -> Self {
                match raw {
                    $($value => $name::$variant,)+
                    other => $name::Unrecognized(other),
                }
            }

            pub fn raw(self) -> u8 {
                match self {
                    $($name::$variant => $value,)+
                    $name::Unrecognized(other) => other,
                }
            }

            pub fn is_recognized(self) -> bool { !matches!(self, $name::Unrecognized(_)) }
        }
    };
}

persisted_enum!(
    /// Configured preference among slots.
    BootPriority { Automatic = 0, Slot1 = 1, Slot2 = 2, }
);

persisted_enum!(
    /// Which checksum checks run on each boot.
    VerificationMode {
        Off = 0,
        InfoOnly = 1,
        VectorTableOnly = 2,
        ApplicationOnly = 3,
        Full = 4,
    }
);

persisted_enum!(
    /// Watchdog timeout tier armed before jumping to an application.
    WatchdogMode { Off = 0, Long = 1, Medium = 2, Short = 3, }
);

/// Descriptor of an installed application image, supplied by the
/// installer. Shared verbatim with applications across the dispatch
/// table, hence `repr(C)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct AppInfo {
    pub id: u32,
    pub version: u32,
    /// Image size in bytes.
    pub size: u32,
    /// Checksum of the first 188 bytes of the slot.
    pub vector_table_checksum: u32,
    /// Checksum of the first `size` bytes of the slot.
    pub app_checksum: u32,
}

impl AppInfo {
    pub const NOT_INSTALLED: AppInfo = AppInfo {
        id: 0xFFFF_FFFF,
        version: 0xFFFF_FFFF,
        size: 0xFFFF_FFFF,
        vector_table_checksum: 0xFFFF_FFFF,
        app_checksum: 0xFFFF_FFFF,
    };

    pub fn is_installed(&self) -> bool {
        !SENTINELS.contains(&self.id) && !SENTINELS.contains(&self.size)
    }

    pub fn to_bytes(&self) -> [u8; APP_INFO_SIZE] {
        let mut bytes = [0u8; APP_INFO_SIZE];
        let fields =
            [self.id, self.version, self.size, self.vector_table_checksum, self.app_checksum];
        bytes.chunks_exact_mut(4).zip(fields.iter()).for_each(|(chunk, field)| {
            chunk.copy_from_slice(&field.to_le_bytes());
        });
        bytes
    }

    pub fn from_bytes(bytes: &[u8; APP_INFO_SIZE]) -> Self {
        let word = |i: usize| read_u32(&bytes[..], i * 4);
        AppInfo {
            id: word(0),
            version: word(1),
            size: word(2),
            vector_table_checksum: word(3),
            app_checksum: word(4),
        }
    }
}

/// Per slot portion of the metadata record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct SlotRecord {
    /// Checksum computed by the bootloader over the bytes of `info`.
    pub info_checksum: u32,
    pub fault_count: u8,
    pub info: AppInfo,
}

impl Default for SlotRecord {
    fn default() -> Self {
        Self { info_checksum: 0xFFFF_FFFF, fault_count: 0, info: AppInfo::NOT_INSTALLED }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct BootloaderMetadata {
    pub version: u32,
    pub boot_priority: BootPriority,
    pub verification_mode: VerificationMode,
    pub watchdog_mode: WatchdogMode,
    pub slots: [SlotRecord; 2],
}

impl Default for BootloaderMetadata {
    fn default() -> Self {
        Self {
            version: BOOTLOADER_VERSION,
            boot_priority: BootPriority::Automatic,
            verification_mode: VerificationMode::Off,
            watchdog_mode: WatchdogMode::Off,
            slots: [SlotRecord::default(); 2],
        }
    }
}

impl BootloaderMetadata {
    /// Blank or zeroed records have never been written by a bootloader.
    pub fn is_initialized(&self) -> bool { !SENTINELS.contains(&self.version) }

    pub fn slot(&self, slot: Slot) -> &SlotRecord { &self.slots[slot.index()] }
    pub fn slot_mut(&mut self, slot: Slot) -> &mut SlotRecord { &mut self.slots[slot.index()] }

    pub fn to_bytes(&self) -> [u8; METADATA_SIZE] {
        let mut bytes = [0u8; METADATA_SIZE];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4] = self.boot_priority.raw();
        bytes[5] = self.verification_mode.raw();
        bytes[6] = self.watchdog_mode.raw();
        for (record, &offset) in self.slots.iter().zip(SLOT_RECORD_OFFSETS.iter()) {
            bytes[offset..offset + 4].copy_from_slice(&record.info_checksum.to_le_bytes());
            bytes[offset + 4] = record.fault_count;
            bytes[offset + 8..offset + SLOT_RECORD_SIZE].copy_from_slice(&record.info.to_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8; METADATA_SIZE]) -> Self {
        let slot = |offset: usize| {
            let mut info = [0u8; APP_INFO_SIZE];
            info.copy_from_slice(&bytes[offset + 8..offset + SLOT_RECORD_SIZE]);
            SlotRecord {
                info_checksum: read_u32(&bytes[..], offset),
                fault_count: bytes[offset + 4],
                info: AppInfo::from_bytes(&info),
            }
        };
        Self {
            version: read_u32(&bytes[..], 0),
            boot_priority: BootPriority::from_raw(bytes[4]),
            verification_mode: VerificationMode::from_raw(bytes[5]),
            watchdog_mode: WatchdogMode::from_raw(bytes[6]),
            slots: [slot(SLOT_RECORD_OFFSETS[0]), slot(SLOT_RECORD_OFFSETS[1])],
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Thin storage service over the metadata page. Holds no copy of the
/// record; every call goes to flash.
#[derive(Copy, Clone, Debug)]
pub struct MetadataStore {
    layout: MemoryLayout,
}

impl MetadataStore {
    pub fn new(layout: &MemoryLayout) -> Self { Self { layout: *layout } }

    pub fn load<F>(&self, flash: &mut F) -> Result<BootloaderMetadata, Error>
    where
        F: flash::Read,
        Error: From<F::Error>,
    {
        let mut bytes = [0u8; METADATA_SIZE];
        block!(flash.read(self.layout.metadata.start, &mut bytes))?;
        Ok(BootloaderMetadata::from_bytes(&bytes))
    }

    /// Erases the metadata page, programs the record and reads it back.
    ///
    /// Not atomic: losing power between erase and program leaves a
    /// blank record, which the next boot reinitializes to defaults.
    pub fn store<F>(&self, flash: &mut F, metadata: &BootloaderMetadata) -> Result<(), Error>
    where
        F: flash::ReadWrite,
        Error: From<F::Error>,
    {
        let bytes = metadata.to_bytes();
        programming::with_unlocked(flash, |flash| {
            programming::erase_region(flash, &self.layout, &self.layout.metadata)?;
            programming::program_bytes(flash, self.layout.metadata.start, &bytes)
        })
    }

    /// Load, mutate, store. Returns the record as persisted.
    pub fn modify<F, M>(&self, flash: &mut F, mutate: M) -> Result<BootloaderMetadata, Error>
    where
        F: flash::ReadWrite,
        Error: From<F::Error>,
        M: FnOnce(&mut BootloaderMetadata),
    {
        let mut metadata = self.load(flash)?;
        mutate(&mut metadata);
        self.store(flash, &metadata)?;
        Ok(metadata)
    }

    /// Brings the record into a usable state: blank records get the
    /// defaults, records from another bootloader version get their
    /// version rewritten.
    pub fn initialize<F>(&self, flash: &mut F) -> Result<BootloaderMetadata, Error>
    where
        F: flash::ReadWrite,
        Error: From<F::Error>,
    {
        let metadata = self.load(flash)?;
        if !metadata.is_initialized() {
            info!("Metadata uninitialized. Writing defaults.");
            let defaults = BootloaderMetadata::default();
            self.store(flash, &defaults)?;
            Ok(defaults)
        } else if metadata.version != BOOTLOADER_VERSION {
            info!("Metadata version {} upgraded to {}", metadata.version, BOOTLOADER_VERSION);
            self.modify(flash, |m| m.version = BOOTLOADER_VERSION)
        } else {
            Ok(metadata)
        }
    }
}
