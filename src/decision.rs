//! Does the device already carry the desired layout?

use serde::Serialize;

use crate::table::{Layout, PartitionEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotStatus {
    Match,
    SizeDiffers { current_size: u64 },
    Missing,
}

/// A desired entry paired with its current counterpart, if any.
#[derive(Debug, Clone, Serialize)]
pub struct SlotComparison {
    pub desired: PartitionEntry,
    pub current_device: Option<String>,
    pub status: SlotStatus,
}

/// Pair every desired entry with the current entry in the same slot.
///
/// Slots are identified by start sector only; device names and labels
/// differ between a live dump and a table file.
pub fn compare(current: &Layout, desired: &Layout) -> Vec<SlotComparison> {
    desired
        .entries()
        .iter()
        .map(|want| {
            let have = current.find_slot(want.start_sector);
            let status = match have {
                None => SlotStatus::Missing,
                Some(have) if have.size_sectors == want.size_sectors => SlotStatus::Match,
                Some(have) => SlotStatus::SizeDiffers {
                    current_size: have.size_sectors,
                },
            };
            SlotComparison {
                desired: want.clone(),
                current_device: have.map(|h| h.device_id.clone()),
                status,
            }
        })
        .collect()
}

/// `current` is `None` when the live table could not be read, which always
/// means re-provisioning.
pub fn needs_resize(current: Option<&Layout>, desired: &Layout) -> bool {
    let Some(current) = current else {
        return true;
    };
    desired.entries().iter().any(|want| {
        current
            .find_slot(want.start_sector)
            .is_none_or(|have| have.size_sectors != want.size_sectors)
    })
}
