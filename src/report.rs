use comfy_table::{Table, presets::UTF8_FULL};
use serde::Serialize;

use crate::decision::{SlotComparison, SlotStatus};
use crate::preserve::{BackupOutcome, RestoreOutcome};
use crate::provision::{ProvisionAction, ProvisionedPartition};

#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub device: String,
    pub label: String,
    pub start_sector: u64,
    pub action: ProvisionAction,
    /// `None` when the slot did not exist before repartitioning
    pub backup: Option<BackupOutcome>,
    pub restore: RestoreOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub device: String,
    pub partitions: Vec<PartitionReport>,
}

impl RunReport {
    /// Join provisioning, backup and restore results on the partition's
    /// device path.
    pub fn assemble(
        device: &str,
        provisioned: Vec<ProvisionedPartition>,
        backups: &[(String, BackupOutcome)],
        restores: &[(String, RestoreOutcome)],
    ) -> Self {
        let partitions = provisioned
            .into_iter()
            .map(|p| {
                let backup = backups
                    .iter()
                    .find(|(dev, _)| *dev == p.device)
                    .map(|(_, b)| b.clone());
                let restore = restores
                    .iter()
                    .find(|(dev, _)| *dev == p.device)
                    .map(|(_, r)| r.clone())
                    .unwrap_or(RestoreOutcome::NoBackup);
                PartitionReport {
                    device: p.device,
                    label: p.label,
                    start_sector: p.start_sector,
                    action: p.action,
                    backup,
                    restore,
                }
            })
            .collect();
        Self {
            device: device.to_string(),
            partitions,
        }
    }

    pub fn data_loss(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions.iter().filter(|p| {
            matches!(p.action, ProvisionAction::Reformatted { .. })
                && !matches!(p.restore, RestoreOutcome::Restored)
        })
    }

    pub fn render(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Device", "Label", "Start", "Filesystem", "Backup", "Restore"]);
        for p in &self.partitions {
            table.add_row(vec![
                p.device.clone(),
                p.label.clone(),
                p.start_sector.to_string(),
                describe_action(&p.action),
                p.backup
                    .as_ref()
                    .map(describe_backup)
                    .unwrap_or_else(|| "-".to_string()),
                describe_restore(&p.restore),
            ]);
        }
        table.to_string()
    }
}

fn describe_action(action: &ProvisionAction) -> String {
    match action {
        ProvisionAction::Formatted { fs } => format!("formatted {fs}"),
        ProvisionAction::Resized { fs } => format!("resized {fs}"),
        ProvisionAction::Reformatted { previous, fs, .. } => {
            format!("reformatted {previous} -> {fs}")
        }
    }
}

fn describe_backup(backup: &BackupOutcome) -> String {
    match backup {
        BackupOutcome::Archived { .. } => "archived".to_string(),
        BackupOutcome::Failed { .. } => "failed".to_string(),
    }
}

fn describe_restore(restore: &RestoreOutcome) -> String {
    match restore {
        RestoreOutcome::Restored => "restored",
        RestoreOutcome::NotEmpty => "skipped (not empty)",
        RestoreOutcome::NoBackup => "-",
        RestoreOutcome::Failed { .. } => "failed",
    }
    .to_string()
}

/// Slot-by-slot view used by `plan`.
pub fn render_plan(comparison: &[SlotComparison]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Slot", "Label", "Start", "Size", "Current", "Status"]);
    for c in comparison {
        let status = match &c.status {
            SlotStatus::Match => "ok".to_string(),
            SlotStatus::SizeDiffers { current_size } => format!("resize from {current_size}"),
            SlotStatus::Missing => "create".to_string(),
        };
        table.add_row(vec![
            c.desired.device_id.clone(),
            c.desired.label().unwrap_or("-").to_string(),
            c.desired.start_sector.to_string(),
            c.desired.size_sectors.to_string(),
            c.current_device.clone().unwrap_or_else(|| "-".to_string()),
            status,
        ]);
    }
    table.to_string()
}
