//! Back up partition contents before repartitioning and restore them into
//! the freshly provisioned filesystems afterwards.
//!
//! Nothing here is fatal: a partition whose backup fails goes through the
//! run without one, and a failed restore leaves its archive in place.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::table::Layout;
use crate::tools::Toolbox;
use crate::ui::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BackupOutcome {
    Archived { archive: PathBuf },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Restored,
    /// Target already held data; the archive was not extracted
    NotEmpty,
    NoBackup,
    Failed { reason: String },
}

/// `<staging>/dev/mmcblk0p2.tar.gz` for `/dev/mmcblk0p2`.
pub fn archive_path(staging_dir: &Path, device: &str) -> PathBuf {
    staging_dir.join(format!("{}.tar.gz", device.trim_start_matches('/')))
}

/// Fewer than two entries below `root`, counted recursively. A lone
/// `lost+found` left by mkfs still counts as empty.
pub fn looks_empty(root: &Path) -> Result<bool> {
    let mut seen = 0;
    for entry in WalkDir::new(root).min_depth(1) {
        entry.with_context(|| format!("failed to scan {}", root.display()))?;
        seen += 1;
        if seen >= 2 {
            return Ok(false);
        }
    }
    Ok(true)
}

fn scratch_mount_point() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("partfit-mnt-")
        .tempdir()
        .context("failed to create scratch mount point")
}

/// Mount `device` on a scratch directory, run `op` on it and unmount again,
/// even when `op` fails.
fn with_mounted<T>(
    tools: &Toolbox,
    device: &str,
    op: impl FnOnce(&Path) -> Result<T>,
) -> Result<T> {
    tools.ensure_unmounted(device)?;
    let scratch = scratch_mount_point()?;
    tools
        .mounts
        .mount(device, scratch.path())
        .with_context(|| format!("failed to mount {device}"))?;

    let result = op(scratch.path());

    if let Err(e) = tools.mounts.unmount(device) {
        emit(
            Level::Warn,
            "preserve.unmount_failed",
            &format!("Could not unmount {}: {:#}", device, e),
            None,
        );
    }
    result
}

pub fn backup_data(
    tools: &Toolbox,
    current: &Layout,
    staging_dir: &Path,
) -> Vec<(String, BackupOutcome)> {
    current
        .entries()
        .iter()
        .map(|entry| {
            let device = entry.device_id.as_str();
            let outcome = match backup_one(tools, device, staging_dir) {
                Ok(archive) => {
                    emit(
                        Level::Success,
                        "backup.archived",
                        &format!("Backed up {} to {}", device, archive.display()),
                        None,
                    );
                    BackupOutcome::Archived { archive }
                }
                Err(e) => {
                    emit(
                        Level::Warn,
                        "backup.failed",
                        &format!(
                            "No backup for {}: {:#}. Its data will not survive a reformat",
                            device, e
                        ),
                        None,
                    );
                    BackupOutcome::Failed {
                        reason: format!("{e:#}"),
                    }
                }
            };
            (device.to_string(), outcome)
        })
        .collect()
}

fn backup_one(tools: &Toolbox, device: &str, staging_dir: &Path) -> Result<PathBuf> {
    if !tools.probe.device_exists(device) {
        anyhow::bail!("device node {device} does not exist");
    }

    let archive = archive_path(staging_dir, device);
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let created = with_mounted(tools, device, |mount_point| {
        tools.archiver.create(mount_point, &archive)
    });
    if let Err(e) = created {
        if let Err(rm) = fs::remove_file(&archive)
            && rm.kind() != std::io::ErrorKind::NotFound
        {
            emit(
                Level::Warn,
                "backup.cleanup_failed",
                &format!("Could not delete partial archive {}: {}", archive.display(), rm),
                None,
            );
        }
        return Err(e);
    }
    Ok(archive)
}

pub fn restore_data(
    tools: &Toolbox,
    current: &Layout,
    staging_dir: &Path,
) -> Vec<(String, RestoreOutcome)> {
    current
        .entries()
        .iter()
        .map(|entry| {
            let device = entry.device_id.as_str();
            let archive = archive_path(staging_dir, device);
            if !archive.is_file() {
                emit(
                    Level::Debug,
                    "restore.no_backup",
                    &format!("No backup archive for {}", device),
                    None,
                );
                return (device.to_string(), RestoreOutcome::NoBackup);
            }

            let outcome = match restore_one(tools, device, &archive) {
                Ok(RestoreOutcome::NotEmpty) => {
                    emit(
                        Level::Warn,
                        "restore.skipped",
                        &format!(
                            "{} already contains data, leaving {} unrestored",
                            device,
                            archive.display()
                        ),
                        None,
                    );
                    RestoreOutcome::NotEmpty
                }
                Ok(outcome) => {
                    emit(
                        Level::Success,
                        "restore.done",
                        &format!("Restored {} from {}", device, archive.display()),
                        None,
                    );
                    outcome
                }
                Err(e) => {
                    emit(
                        Level::Warn,
                        "restore.failed",
                        &format!("Restoring {} failed: {:#}", device, e),
                        None,
                    );
                    RestoreOutcome::Failed {
                        reason: format!("{e:#}"),
                    }
                }
            };
            (device.to_string(), outcome)
        })
        .collect()
}

fn restore_one(tools: &Toolbox, device: &str, archive: &Path) -> Result<RestoreOutcome> {
    with_mounted(tools, device, |mount_point| {
        if !looks_empty(mount_point)? {
            return Ok(RestoreOutcome::NotEmpty);
        }
        tools.archiver.extract(archive, mount_point)?;
        Ok(RestoreOutcome::Restored)
    })
}
