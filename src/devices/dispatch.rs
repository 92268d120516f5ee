//! Cross image dispatch table.
//!
//! The bootloader publishes a table of `extern "C"` function pointers
//! at a fixed address (the last 0x100 bytes of its own region) so a
//! running application can reach the [`Services`] without linking
//! against the bootloader. Entry order and signatures are a stable
//! ABI: new entries may only be appended.
//!
//! [`Services`]: super::services::Services
use super::metadata::{AppInfo, BootPriority, Slot, VerificationMode, WatchdogMode};
use crate::{
    error::Error,
    hal::flash::PROGRAM_UNIT,
    utilities::memory::{Address, MemoryLayout, Region},
};
use core::mem::{align_of, size_of};
use static_assertions::const_assert;

pub const DISPATCH_TABLE_ENTRIES: usize = 22;

/// Numeric status returned by every mutating entry.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Status {
    Ok = 0,
    /// Unspecified error.
    Error = 1,
    NotImplemented = 2,
    /// The flash controller or another peripheral rejected the request.
    Hal = 3,
    WriteVerification = 4,
    DataAlignment = 5,
    OutOfRange = 6,
}

impl Status {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Status::Ok,
            2 => Status::NotImplemented,
            3 => Status::Hal,
            4 => Status::WriteVerification,
            5 => Status::DataAlignment,
            6 => Status::OutOfRange,
            _ => Status::Error,
        }
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Status::Ok => Ok(()),
            Status::Error => Err(Error::DriverError("Unspecified bootloader error")),
            Status::NotImplemented => Err(Error::NotImplementedFault),
            Status::Hal => Err(Error::MemoryFault),
            Status::WriteVerification => Err(Error::WriteVerificationFault),
            Status::DataAlignment => Err(Error::AlignmentFault),
            Status::OutOfRange => Err(Error::OutOfRangeFault),
        }
    }
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        match error {
            Error::MemoryFault | Error::DriverError(_) => Status::Hal,
            Error::WriteVerificationFault => Status::WriteVerification,
            Error::AlignmentFault => Status::DataAlignment,
            Error::OutOfRangeFault => Status::OutOfRange,
            Error::NotImplementedFault => Status::NotImplemented,
        }
    }
}

impl From<Result<(), Error>> for Status {
    fn from(result: Result<(), Error>) -> Self {
        match result {
            Ok(()) => Status::Ok,
            Err(e) => {
                e.report();
                e.into()
            }
        }
    }
}

#[repr(C)]
pub struct DispatchTable {
    pub get_version: extern "C" fn() -> u32,
    pub get_boot_priority: extern "C" fn() -> u8,
    pub set_boot_priority: extern "C" fn(u8) -> u32,
    pub get_verification_mode: extern "C" fn() -> u8,
    pub set_verification_mode: extern "C" fn(u8) -> u32,
    pub get_watchdog_mode: extern "C" fn() -> u8,
    pub set_watchdog_mode: extern "C" fn(u8) -> u32,
    pub reset_watchdog: extern "C" fn() -> u32,
    pub enable_programming_mode: extern "C" fn() -> u32,
    pub disable_programming_mode: extern "C" fn() -> u32,
    pub app1_get_fault_count: extern "C" fn() -> u8,
    pub app1_reset_fault_count: extern "C" fn() -> u32,
    pub app1_get_info: extern "C" fn() -> AppInfo,
    pub app1_erase: extern "C" fn() -> u32,
    /// Byte offset into the slot, pointer to double words, double word count.
    pub app1_write: extern "C" fn(u32, *const u64, u32) -> u32,
    pub app1_write_info: extern "C" fn(AppInfo) -> u32,
    pub app2_get_fault_count: extern "C" fn() -> u8,
    pub app2_reset_fault_count: extern "C" fn() -> u32,
    pub app2_get_info: extern "C" fn() -> AppInfo,
    pub app2_erase: extern "C" fn() -> u32,
    pub app2_write: extern "C" fn(u32, *const u64, u32) -> u32,
    pub app2_write_info: extern "C" fn(AppInfo) -> u32,
}

const_assert!(
    size_of::<DispatchTable>() == DISPATCH_TABLE_ENTRIES * size_of::<extern "C" fn() -> u32>()
);
const_assert!(size_of::<DispatchTable>() <= 0x100);

/// Where the table lives for a given layout.
pub fn table_address(layout: &MemoryLayout) -> Address { layout.dispatch_table_address() }

/// Resolves a getter's result, logging failures and falling back to
/// a sentinel the caller can't mistake for a valid value.
pub fn or_sentinel<T>(result: Result<T, Error>, sentinel: T) -> T {
    result.unwrap_or_else(|e| {
        e.report();
        sentinel
    })
}

/// Borrows the double words an application handed over for writing
/// `offset` bytes into `region`. The span is checked against the region
/// before the buffer is touched, so a bogus `length` never turns into
/// a slice.
///
/// # Safety
///
/// If the span fits the region, `data` must either be null or point to
/// `length` readable double words that stay untouched for the duration
/// of the borrow.
pub unsafe fn units<'a>(
    region: &Region,
    offset: u32,
    data: *const u64,
    length: u32,
) -> Result<&'a [u64], Error> {
    let span = (length as usize).checked_mul(PROGRAM_UNIT).ok_or(Error::OutOfRangeFault)?;
    if !region.fits(offset as usize, span) || data.is_null() {
        return Err(Error::OutOfRangeFault);
    }
    if data as usize % align_of::<u64>() != 0 {
        return Err(Error::AlignmentFault);
    }
    Ok(core::slice::from_raw_parts(data, length as usize))
}

/// Defines a static [`DispatchTable`] whose entries forward to a
/// [`Services`](super::services::Services) instance.
///
/// `$with` must be a function that takes a closure over `&mut Services`
/// and returns the closure's result. It owns how peripherals are
/// obtained on each call.
#[macro_export]
macro_rules! dispatch_table {
    ($(#[$attribute:meta])* $name:ident, $with:path) => {
        $(#[$attribute])*
        pub static $name: $crate::devices::dispatch::DispatchTable = {
            use $crate::devices::{
                dispatch::{or_sentinel, units, DispatchTable, Status},
                metadata::{AppInfo, BootPriority, Slot, VerificationMode, WatchdogMode},
            };

            extern "C" fn get_version() -> u32 {
                or_sentinel($with(|s| s.version()), u32::MAX)
            }
            extern "C" fn get_boot_priority() -> u8 {
                or_sentinel($with(|s| s.boot_priority().map(BootPriority::raw)), u8::MAX)
            }
            extern "C" fn set_boot_priority(raw: u8) -> u32 {
                Status::from($with(|s| s.set_boot_priority(BootPriority::from_raw(raw)))) as u32
            }
            extern "C" fn get_verification_mode() -> u8 {
                or_sentinel($with(|s| s.verification_mode().map(VerificationMode::raw)), u8::MAX)
            }
            extern "C" fn set_verification_mode(raw: u8) -> u32 {
                Status::from($with(|s| s.set_verification_mode(VerificationMode::from_raw(raw))))
                    as u32
            }
            extern "C" fn get_watchdog_mode() -> u8 {
                or_sentinel($with(|s| s.watchdog_mode().map(WatchdogMode::raw)), u8::MAX)
            }
            extern "C" fn set_watchdog_mode(raw: u8) -> u32 {
                Status::from($with(|s| s.set_watchdog_mode(WatchdogMode::from_raw(raw)))) as u32
            }
            extern "C" fn reset_watchdog() -> u32 {
                Status::from($with(|s| s.reset_watchdog())) as u32
            }
            extern "C" fn enable_programming_mode() -> u32 {
                Status::from($with(|s| s.enable_programming_mode())) as u32
            }
            extern "C" fn disable_programming_mode() -> u32 {
                Status::from($with(|s| s.disable_programming_mode())) as u32
            }

            $crate::dispatch_table!(@slot Slot::One,
                app1_get_fault_count, app1_reset_fault_count, app1_get_info,
                app1_erase, app1_write, app1_write_info, $with);
            $crate::dispatch_table!(@slot Slot::Two,
                app2_get_fault_count, app2_reset_fault_count, app2_get_info,
                app2_erase, app2_write, app2_write_info, $with);

            DispatchTable {
                get_version,
                get_boot_priority,
                set_boot_priority,
                get_verification_mode,
                set_verification_mode,
                get_watchdog_mode,
                set_watchdog_mode,
                reset_watchdog,
                enable_programming_mode,
                disable_programming_mode,
                app1_get_fault_count,
                app1_reset_fault_count,
                app1_get_info,
                app1_erase,
                app1_write,
                app1_write_info,
                app2_get_fault_count,
                app2_reset_fault_count,
                app2_get_info,
                app2_erase,
                app2_write,
                app2_write_info,
            }
        };
    };
    (@slot $slot:expr, $fault_count:ident, $reset_fault_count:ident, $info:ident,
     $erase:ident, $write:ident, $write_info:ident, $with:path) => {
        extern "C" fn $fault_count() -> u8 {
            or_sentinel($with(|s| s.fault_count($slot)), u8::MAX)
        }
        extern "C" fn $reset_fault_count() -> u32 {
            Status::from($with(|s| s.reset_fault_count($slot))) as u32
        }
        extern "C" fn $info() -> AppInfo {
            or_sentinel($with(|s| s.info($slot)), AppInfo::NOT_INSTALLED)
        }
        extern "C" fn $erase() -> u32 {
            Status::from($with(|s| s.erase($slot))) as u32
        }
        extern "C" fn $write(offset: u32, data: *const u64, length: u32) -> u32 {
            let result = $with(|s| {
                let region = s.slot_region($slot);
                // NOTE(Safety): The caller guarantees `length` double words at `data`.
                unsafe { units(&region, offset, data, length) }
                    .and_then(|units| s.write($slot, offset as usize, units))
            });
            Status::from(result) as u32
        }
        extern "C" fn $write_info(info: AppInfo) -> u32 {
            Status::from($with(|s| s.write_info($slot, info))) as u32
        }
    };
}

/// Typed, application side view of a [`DispatchTable`].
#[derive(Copy, Clone)]
pub struct Client {
    table: &'static DispatchTable,
}

impl Client {
    /// # Safety
    ///
    /// A bootloader exposing a [`DispatchTable`] must be present at
    /// `address`.
    pub unsafe fn locate(address: Address) -> Self {
        Self { table: &*(address.0 as *const DispatchTable) }
    }

    pub fn from_table(table: &'static DispatchTable) -> Self { Self { table } }

    pub fn version(&self) -> u32 { (self.table.get_version)() }

    pub fn boot_priority(&self) -> BootPriority {
        BootPriority::from_raw((self.table.get_boot_priority)())
    }

    pub fn set_boot_priority(&self, priority: BootPriority) -> Result<(), Error> {
        Status::from_raw((self.table.set_boot_priority)(priority.raw())).into_result()
    }

    pub fn verification_mode(&self) -> VerificationMode {
        VerificationMode::from_raw((self.table.get_verification_mode)())
    }

    pub fn set_verification_mode(&self, mode: VerificationMode) -> Result<(), Error> {
        Status::from_raw((self.table.set_verification_mode)(mode.raw())).into_result()
    }

    pub fn watchdog_mode(&self) -> WatchdogMode {
        WatchdogMode::from_raw((self.table.get_watchdog_mode)())
    }

    pub fn set_watchdog_mode(&self, mode: WatchdogMode) -> Result<(), Error> {
        Status::from_raw((self.table.set_watchdog_mode)(mode.raw())).into_result()
    }

    pub fn reset_watchdog(&self) -> Result<(), Error> {
        Status::from_raw((self.table.reset_watchdog)()).into_result()
    }

    pub fn enable_programming_mode(&self) -> Result<(), Error> {
        Status::from_raw((self.table.enable_programming_mode)()).into_result()
    }

    pub fn disable_programming_mode(&self) -> Result<(), Error> {
        Status::from_raw((self.table.disable_programming_mode)()).into_result()
    }

    pub fn fault_count(&self, slot: Slot) -> u8 {
        (self.pick(slot, self.table.app1_get_fault_count, self.table.app2_get_fault_count))()
    }

    pub fn reset_fault_count(&self, slot: Slot) -> Result<(), Error> {
        let entry =
            self.pick(slot, self.table.app1_reset_fault_count, self.table.app2_reset_fault_count);
        Status::from_raw(entry()).into_result()
    }

    pub fn info(&self, slot: Slot) -> AppInfo {
        (self.pick(slot, self.table.app1_get_info, self.table.app2_get_info))()
    }

    pub fn erase(&self, slot: Slot) -> Result<(), Error> {
        Status::from_raw((self.pick(slot, self.table.app1_erase, self.table.app2_erase))())
            .into_result()
    }

    /// Writes `units` starting `offset` bytes into the slot.
    pub fn write(&self, slot: Slot, offset: u32, units: &[u64]) -> Result<(), Error> {
        let length = u32::try_from(units.len()).map_err(|_| Error::OutOfRangeFault)?;
        let entry = self.pick(slot, self.table.app1_write, self.table.app2_write);
        Status::from_raw(entry(offset, units.as_ptr(), length)).into_result()
    }

    pub fn write_info(&self, slot: Slot, info: AppInfo) -> Result<(), Error> {
        let entry = self.pick(slot, self.table.app1_write_info, self.table.app2_write_info);
        Status::from_raw(entry(info)).into_result()
    }

    fn pick<T>(&self, slot: Slot, one: T, two: T) -> T {
        match slot {
            Slot::One => one,
            Slot::Two => two,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::{
            metadata::MetadataStore,
            services::Services,
            verification,
        },
        drivers::crc::SoftwareCrc,
        hal::{
            crc::Crc32,
            doubles::{
                flash::FakeFlash,
                layout::{fake_flash, LAYOUT},
                watchdog::FakeWatchdog,
            },
            watchdog::Prescaler,
        },
    };
    use std::cell::RefCell;

    type TestServices = Services<FakeFlash, SoftwareCrc, FakeWatchdog>;

    thread_local! {
        static SERVICES: RefCell<Option<TestServices>> = RefCell::new(None);
    }

    fn fresh_device() {
        let mut flash = fake_flash();
        MetadataStore::new(&LAYOUT).initialize(&mut flash).unwrap();
        let services = Services::new(&LAYOUT, flash, SoftwareCrc::new(), FakeWatchdog::default());
        SERVICES.with(|cell| *cell.borrow_mut() = Some(services));
    }

    fn with_services<T>(operation: impl FnOnce(&mut TestServices) -> T) -> T {
        SERVICES.with(|cell| {
            let mut borrowed = cell.borrow_mut();
            operation(borrowed.as_mut().expect("device not initialized"))
        })
    }

    dispatch_table!(TABLE, with_services);

    fn client() -> Client {
        fresh_device();
        Client::from_table(&TABLE)
    }

    #[test]
    fn table_sits_at_the_end_of_the_bootloader_region() {
        assert_eq!(table_address(&LAYOUT), Address(0x0800_3700));
        assert_eq!(size_of::<DispatchTable>(), DISPATCH_TABLE_ENTRIES * size_of::<usize>());
    }

    #[test]
    fn errors_map_to_stable_status_codes() {
        assert_eq!(Status::from(Ok::<(), Error>(())) as u32, 0);
        assert_eq!(Status::from(Error::DriverError("watchdog")) as u32, 3);
        assert_eq!(Status::from(Error::MemoryFault) as u32, 3);
        assert_eq!(Status::from(Error::WriteVerificationFault) as u32, 4);
        assert_eq!(Status::from(Error::AlignmentFault) as u32, 5);
        assert_eq!(Status::from(Error::OutOfRangeFault) as u32, 6);
        assert_eq!(Status::from(Error::NotImplementedFault) as u32, 2);
        assert_eq!(Status::from_raw(42), Status::Error);
        assert_eq!(Status::from_raw(5).into_result(), Err(Error::AlignmentFault));
    }

    #[test]
    fn settings_round_trip_through_the_table() {
        // Given
        let client = client();

        // When
        client.set_boot_priority(BootPriority::Slot1).unwrap();
        client.set_watchdog_mode(WatchdogMode::Short).unwrap();

        // Then
        assert_eq!(client.version(), 1);
        assert_eq!(client.boot_priority(), BootPriority::Slot1);
        assert_eq!(client.watchdog_mode(), WatchdogMode::Short);
        assert_eq!(client.verification_mode(), VerificationMode::Off);
        let armed = with_services(|s| s.safety_net.watchdog().current());
        assert_eq!(armed, Some((Prescaler::Div32, 512)));
    }

    #[test]
    fn raw_unrecognized_values_are_rejected() {
        fresh_device();
        assert_eq!((TABLE.set_boot_priority)(9), Status::OutOfRange as u32);
        assert_eq!((TABLE.set_verification_mode)(5), Status::OutOfRange as u32);
        assert_eq!((TABLE.get_boot_priority)(), 0);
    }

    #[test]
    fn misaligned_writes_report_alignment_status() {
        // Given
        let client = client();
        client.enable_programming_mode().unwrap();
        client.erase(Slot::One).unwrap();

        // When
        let misaligned_offset = client.write(Slot::One, 4, &[0u64; 2]);
        let null = (TABLE.app1_write)(0, core::ptr::null(), 1);

        // Then
        assert_eq!(misaligned_offset, Err(Error::AlignmentFault));
        assert_eq!(null, Status::OutOfRange as u32);
    }

    #[test]
    fn oversized_lengths_are_rejected_before_the_buffer_is_borrowed() {
        // Given
        let client = client();
        client.enable_programming_mode().unwrap();
        let buffer = [0u64; 4];
        let slot_units = (LAYOUT.slots[0].length / 8) as u32;
        let before = with_services(|s| s.flash.snapshot());

        // When
        let huge = (TABLE.app1_write)(0, buffer.as_ptr(), 0x1000_0000);
        let past_end = (TABLE.app1_write)(0, buffer.as_ptr(), slot_units + 1);
        let overflowing_offset = (TABLE.app2_write)(u32::MAX - 7, buffer.as_ptr(), 2);

        // Then
        assert_eq!(huge, Status::OutOfRange as u32);
        assert_eq!(past_end, Status::OutOfRange as u32);
        assert_eq!(overflowing_offset, Status::OutOfRange as u32);
        assert_eq!(with_services(|s| s.flash.snapshot()), before);
    }

    #[test]
    fn write_spans_are_checked_against_the_slot() {
        let region = LAYOUT.slots[1];
        let buffer = [7u64; 2];
        let last = (region.length - 16) as u32;
        // NOTE(Safety): Every accepted span below lies within `buffer`.
        unsafe {
            assert_eq!(units(&region, last, buffer.as_ptr(), 2), Ok(&buffer[..]));
            assert_eq!(units(&region, last + 8, buffer.as_ptr(), 2), Err(Error::OutOfRangeFault));
            assert_eq!(units(&region, 0, buffer.as_ptr(), u32::MAX), Err(Error::OutOfRangeFault));
            assert_eq!(units(&region, 0, core::ptr::null(), 1), Err(Error::OutOfRangeFault));
        }
    }

    #[test]
    fn install_through_the_table_verifies_in_full() {
        // Given
        let client = client();
        let image: Vec<u64> = (0..128u64).map(|i| i.wrapping_mul(0x0101_0101_0101_0101)).collect();
        let bytes: Vec<u8> = image.iter().flat_map(|unit| unit.to_le_bytes()).collect();
        let mut crc = SoftwareCrc::new();
        let info = AppInfo {
            id: 3,
            version: 11,
            size: bytes.len() as u32,
            vector_table_checksum: crc.checksum(&bytes[..verification::VECTOR_TABLE_SIZE]),
            app_checksum: crc.checksum(&bytes),
        };

        // When
        client.set_verification_mode(VerificationMode::Full).unwrap();
        client.enable_programming_mode().unwrap();
        client.erase(Slot::Two).unwrap();
        client.write(Slot::Two, 0, &image).unwrap();
        client.write_info(Slot::Two, info).unwrap();
        client.disable_programming_mode().unwrap();

        // Then
        assert_eq!(client.info(Slot::Two), info);
        assert_eq!(client.info(Slot::One), AppInfo::NOT_INSTALLED);
        assert_eq!(client.fault_count(Slot::Two), 0);
        let verdict = with_services(|s| {
            let metadata = s.metadata.load(&mut s.flash).unwrap();
            verification::verify(&mut s.flash, &mut s.crc, &LAYOUT, &metadata)
        });
        assert!(verdict.passed(Slot::Two));
    }

    #[test]
    fn operator_can_clear_fault_counts() {
        let client = client();
        with_services(|s| {
            s.metadata.modify(&mut s.flash, |m| m.slot_mut(Slot::Two).fault_count = 3).unwrap()
        });
        assert_eq!(client.fault_count(Slot::Two), 3);
        client.reset_fault_count(Slot::Two).unwrap();
        assert_eq!(client.fault_count(Slot::Two), 0);
    }
}
