use crate::error::EngineError;
use crate::retry::{RetryPolicy, retry};
use crate::table::DesiredLayout;
use crate::tools::PartitionTableWriter;
use crate::ui::prelude::*;

/// Replace the partition table of `device` with `desired` and wait for the
/// kernel to pick it up. Partitions absent from `desired` are destroyed.
pub fn apply(
    writer: &dyn PartitionTableWriter,
    device: &str,
    desired: &DesiredLayout,
    policy: RetryPolicy,
) -> Result<(), EngineError> {
    emit(
        Level::Info,
        "repart.write",
        &format!(
            "Writing {} partition(s) to {}",
            desired.layout().entries().len(),
            device
        ),
        None,
    );
    writer
        .write_table(device, desired)
        .map_err(|e| EngineError::TableWrite {
            device: device.to_string(),
            reason: format!("{e:#}"),
        })?;

    // Re-reading races with partition node creation on some controllers
    retry(policy, "partition table re-read", || {
        writer.reread_table(device)
    })
    .map_err(|e| {
        emit(
            Level::Error,
            "repart.reread.exhausted",
            &format!("Giving up on re-reading {}: {:#}", device, e),
            None,
        );
        EngineError::RereadExhausted {
            device: device.to_string(),
            attempts: policy.max_attempts,
        }
    })?;

    emit(
        Level::Success,
        "repart.done",
        &format!("Partition table of {} updated", device),
        None,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::fake::{Call, FakeDevice};
    use std::time::Duration;

    const TABLE: &str = "boot : start=2048, size=1024, name=boot\n";

    fn policy() -> RetryPolicy {
        RetryPolicy::new(10, Duration::ZERO)
    }

    #[test]
    fn writes_then_rereads() {
        let device = FakeDevice::new("/dev/mmcblk0", 1 << 20);
        apply(&device, "/dev/mmcblk0", &DesiredLayout::parse(TABLE), policy()).unwrap();
        assert_eq!(device.calls(), vec![Call::WriteTable, Call::Reread]);
    }

    #[test]
    fn reread_is_retried_until_it_succeeds() {
        let device = FakeDevice::new("/dev/mmcblk0", 1 << 20);
        device.set_reread_failures(9);
        apply(&device, "/dev/mmcblk0", &DesiredLayout::parse(TABLE), policy()).unwrap();
        let rereads = device
            .calls()
            .iter()
            .filter(|c| **c == Call::Reread)
            .count();
        assert_eq!(rereads, 10);
    }

    #[test]
    fn exhausted_reread_is_fatal() {
        let device = FakeDevice::new("/dev/mmcblk0", 1 << 20);
        device.set_reread_failures(10);
        let err = apply(&device, "/dev/mmcblk0", &DesiredLayout::parse(TABLE), policy())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RereadExhausted { attempts: 10, .. }
        ));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn write_failure_skips_reread() {
        let device = FakeDevice::new("/dev/mmcblk0", 1 << 20);
        device.set_failing_write();
        let err = apply(&device, "/dev/mmcblk0", &DesiredLayout::parse(TABLE), policy())
            .unwrap_err();
        assert!(matches!(err, EngineError::TableWrite { .. }));
        assert_eq!(device.calls(), vec![Call::WriteTable]);
    }
}
