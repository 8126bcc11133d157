//! The reconciliation pipeline: decide, validate, back up, repartition,
//! provision, restore.

use crate::config::EngineConfig;
use crate::decision::needs_resize;
use crate::error::EngineError;
use crate::preserve::{backup_data, restore_data};
use crate::provision::provision_all;
use crate::repartition;
use crate::report::RunReport;
use crate::table::{DesiredLayout, Layout};
use crate::tools::Toolbox;
use crate::ui::prelude::*;
use crate::validate::validate;

#[derive(Debug)]
pub enum Outcome {
    NoResizeNeeded,
    /// Dry run stopped after printing the repartitioning commands
    DryRun,
    Resized(RunReport),
}

pub struct Engine<'a> {
    config: &'a EngineConfig,
    tools: Toolbox<'a>,
}

impl<'a> Engine<'a> {
    pub fn new(config: &'a EngineConfig, tools: Toolbox<'a>) -> Self {
        Self { config, tools }
    }

    pub fn load_desired(&self) -> Result<DesiredLayout, EngineError> {
        let desired = DesiredLayout::from_file(&self.config.table)
            .map_err(|e| EngineError::UnreadableTable(format!("{e:#}")))?;
        if desired.layout().is_empty() {
            return Err(EngineError::UnreadableTable(format!(
                "{} contains no partition entries",
                self.config.table.display()
            )));
        }
        Ok(desired)
    }

    /// Live layout of the target device, or `None` if it cannot be read.
    pub fn read_current(&self) -> Option<Layout> {
        let device = self.config.device_str();
        match self.tools.reader.read_layout(&device) {
            Ok(layout) => Some(layout),
            Err(e) => {
                emit(
                    Level::Warn,
                    "table.unreadable",
                    &format!("Cannot read partition table of {}: {:#}", device, e),
                    None,
                );
                None
            }
        }
    }

    pub fn disk_sectors(&self) -> Result<u64, EngineError> {
        let device = self.config.device_str();
        self.tools
            .reader
            .disk_sectors(&device)
            .map_err(|e| EngineError::DiskSize {
                device,
                reason: format!("{e:#}"),
            })
    }

    pub fn run(&self) -> Result<Outcome, EngineError> {
        let device = self.config.device_str();
        let desired = self.load_desired()?;
        let current = self.read_current();

        if !needs_resize(current.as_ref(), desired.layout()) {
            emit(
                Level::Success,
                "decision.no_resize",
                &format!("{} already matches the desired layout, nothing to do", device),
                None,
            );
            return Ok(Outcome::NoResizeNeeded);
        }
        emit(
            Level::Info,
            "decision.resize",
            &format!("{} needs repartitioning", device),
            None,
        );

        let disk_sectors = self.disk_sectors()?;
        validate(desired.layout(), disk_sectors, self.config.boot_start)?;

        let before = current.unwrap_or_default();
        let backups = backup_data(&self.tools, &before, &self.config.staging_dir);

        repartition::apply(
            self.tools.writer,
            &device,
            &desired,
            self.config.reread_policy(),
        )?;

        // The kernel still sees the old table, so nothing below can be previewed
        if self.config.dry_run {
            emit(
                Level::Info,
                "run.dry_run_stop",
                &format!(
                    "Dry run: {} keeps its current table, skipping provisioning and restore",
                    device
                ),
                None,
            );
            return Ok(Outcome::DryRun);
        }

        let after = self
            .tools
            .reader
            .read_layout(&device)
            .map_err(|e| EngineError::provisioning(&device, e))?;
        let provisioned = provision_all(
            &self.tools,
            &after,
            desired.layout(),
            self.config.boot_start,
        )?;

        let restores = restore_data(&self.tools, &after, &self.config.staging_dir);

        let report = RunReport::assemble(&device, provisioned, &backups, &restores);
        for lost in report.data_loss() {
            emit(
                Level::Warn,
                "run.data_lost",
                &format!(
                    "{} ({}) was reformatted and could not be restored",
                    lost.device, lost.label
                ),
                None,
            );
        }
        Ok(Outcome::Resized(report))
    }
}
