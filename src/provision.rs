//! Bring every partition's filesystem in line with the new table: resize
//! in place when possible, format otherwise.

use serde::Serialize;

use crate::error::EngineError;
use crate::table::Layout;
use crate::tools::{FsType, Toolbox};
use crate::ui::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProvisionAction {
    /// No filesystem was present
    Formatted { fs: FsType },
    Resized { fs: FsType },
    /// The existing filesystem was discarded; its data is gone
    Reformatted {
        previous: FsType,
        fs: FsType,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedPartition {
    pub device: String,
    pub label: String,
    pub start_sector: u64,
    pub action: ProvisionAction,
}

struct Target<'l> {
    device: &'l str,
    label: &'l str,
    start_sector: u64,
}

/// Filesystem a freshly created partition gets.
pub fn fresh_filesystem(start_sector: u64, boot_start: u64) -> FsType {
    if start_sector == boot_start {
        FsType::Ext4
    } else {
        FsType::F2fs
    }
}

/// Pair each partition of the re-read table with its label from the
/// desired table. Any missing node or label aborts before a single
/// partition is touched.
fn resolve_targets<'l>(
    tools: &Toolbox,
    current: &'l Layout,
    desired: &'l Layout,
) -> Result<Vec<Target<'l>>, EngineError> {
    current
        .entries()
        .iter()
        .map(|entry| {
            if !tools.probe.device_exists(&entry.device_id) {
                return Err(EngineError::MissingPartitionDevice(entry.device_id.clone()));
            }
            let label = desired
                .find_slot(entry.start_sector)
                .and_then(|d| d.label())
                .ok_or_else(|| EngineError::EmptyLabel(entry.device_id.clone()))?;
            Ok(Target {
                device: &entry.device_id,
                label,
                start_sector: entry.start_sector,
            })
        })
        .collect()
}

pub fn provision_all(
    tools: &Toolbox,
    current: &Layout,
    desired: &Layout,
    boot_start: u64,
) -> Result<Vec<ProvisionedPartition>, EngineError> {
    let targets = resolve_targets(tools, current, desired)?;

    targets
        .iter()
        .map(|target| {
            let action = provision_one(tools, target, boot_start)?;
            Ok(ProvisionedPartition {
                device: target.device.to_string(),
                label: target.label.to_string(),
                start_sector: target.start_sector,
                action,
            })
        })
        .collect()
}

fn provision_one(
    tools: &Toolbox,
    target: &Target,
    boot_start: u64,
) -> Result<ProvisionAction, EngineError> {
    let device = target.device;
    // Nodes can vanish between resolution and use
    if !tools.probe.device_exists(device) {
        return Err(EngineError::MissingPartitionDevice(device.to_string()));
    }
    tools
        .ensure_unmounted(device)
        .map_err(|e| EngineError::provisioning(device, e))?;

    let fresh = fresh_filesystem(target.start_sector, boot_start);
    let detected = tools
        .probe
        .filesystem_type(device)
        .map_err(|e| EngineError::provisioning(device, e))?;

    let Some(existing) = detected else {
        emit(
            Level::Info,
            "provision.format",
            &format!(
                "{} ({}) has no filesystem, formatting as {}",
                device, target.label, fresh
            ),
            None,
        );
        format(tools, device, &fresh, target.label)?;
        return Ok(ProvisionAction::Formatted { fs: fresh });
    };

    match resize_in_place(tools, device, &existing) {
        Ok(()) => {
            emit(
                Level::Success,
                "provision.resized",
                &format!("Resized {} filesystem on {}", existing, device),
                None,
            );
            Ok(ProvisionAction::Resized { fs: existing })
        }
        Err(reason) => {
            emit(
                Level::Warn,
                "provision.fallback",
                &format!(
                    "{} on {}: {}; reformatting as {}, existing data is lost",
                    existing, device, reason, fresh
                ),
                None,
            );
            format(tools, device, &fresh, target.label)?;
            Ok(ProvisionAction::Reformatted {
                previous: existing,
                fs: fresh,
                reason,
            })
        }
    }
}

/// Consistency check followed by a resize to the full partition size.
/// The error is the reason the filesystem has to be recreated instead.
fn resize_in_place(tools: &Toolbox, device: &str, fs: &FsType) -> Result<(), String> {
    let max_clean = fs
        .max_clean_check_status()
        .ok_or_else(|| format!("no resize support for {fs}"))?;

    let status = tools
        .checker
        .check(device, fs)
        .map_err(|e| format!("consistency check failed to run: {e:#}"))?;
    if status > max_clean {
        return Err(format!("consistency check exited with status {status}"));
    }
    if status > 0 {
        emit(
            Level::Info,
            "provision.check_corrected",
            &format!("Consistency check corrected errors on {device}"),
            None,
        );
    }

    tools
        .resizer
        .resize(device, fs)
        .map_err(|e| format!("resize failed: {e:#}"))
}

fn format(tools: &Toolbox, device: &str, fs: &FsType, label: &str) -> Result<(), EngineError> {
    tools
        .formatter
        .format(device, fs, label)
        .map_err(|e| EngineError::provisioning(device, e))
}
