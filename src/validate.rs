use crate::error::ValidationError;
use crate::table::Layout;

/// Check the desired layout against the disk before anything is written:
/// every entry must fit on the disk, and exactly one entry must sit at
/// `boot_start`.
pub fn validate(
    desired: &Layout,
    disk_sectors: u64,
    boot_start: u64,
) -> Result<(), ValidationError> {
    if let Some(entry) = desired
        .entries()
        .iter()
        .find(|e| e.end_sector() > disk_sectors)
    {
        return Err(ValidationError::OutOfBounds {
            entry: entry.clone(),
            disk_sectors,
        });
    }

    match desired
        .entries()
        .iter()
        .filter(|e| e.is_boot(boot_start))
        .count()
    {
        0 => return Err(ValidationError::NoBootPartition { boot_start }),
        1 => {}
        count => return Err(ValidationError::DuplicateBootPartition { boot_start, count }),
    }

    Ok(())
}
