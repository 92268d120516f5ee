//! Boot slot selection.
//!
//! A pure decision re-evaluated on every boot from the persisted
//! metadata and this boot's verification verdict. Exclusion always
//! wins over configured priority and over version comparison.
use super::{
    metadata::{BootPriority, BootloaderMetadata, Slot},
    verification::Verdict,
};

/// Fault count at which a slot stops being eligible.
pub const FAULT_THRESHOLD: u8 = 3;

/// Reason a slot is disqualified from the current boot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Exclusion {
    NotInstalled,
    FaultThreshold,
    VerificationFailed,
}

pub fn exclusion(metadata: &BootloaderMetadata, verdict: &Verdict, slot: Slot) -> Option<Exclusion> {
    let record = metadata.slot(slot);
    if !record.info.is_installed() {
        Some(Exclusion::NotInstalled)
    } else if record.fault_count >= FAULT_THRESHOLD {
        Some(Exclusion::FaultThreshold)
    } else if !verdict.passed(slot) {
        Some(Exclusion::VerificationFailed)
    } else {
        None
    }
}

/// Picks the slot to boot, or `None` if nothing is bootable.
pub fn select(metadata: &BootloaderMetadata, verdict: &Verdict) -> Option<Slot> {
    let excluded = |slot: Slot| match exclusion(metadata, verdict, slot) {
        Some(reason) => {
            info!("Slot {} excluded: {:?}", slot.number(), reason);
            true
        }
        None => false,
    };

    match (excluded(Slot::One), excluded(Slot::Two)) {
        (true, true) => None,
        (true, false) => Some(Slot::Two),
        (false, true) => Some(Slot::One),
        (false, false) => match metadata.boot_priority {
            BootPriority::Slot1 => Some(Slot::One),
            BootPriority::Slot2 => Some(Slot::Two),
            BootPriority::Automatic => {
                let (one, two) = (metadata.slot(Slot::One).info, metadata.slot(Slot::Two).info);
                if one.id == two.id && two.version > one.version {
                    Some(Slot::Two)
                } else {
                    Some(Slot::One)
                }
            }
            BootPriority::Unrecognized(raw) => {
                warn!("Unrecognized boot priority {}", raw);
                None
            }
        },
    }
}
