use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::checksum::verify_table;
use crate::config::{EngineConfig, FileConfig, Overrides};
use crate::decision::{compare, needs_resize};
use crate::engine::{Engine, Outcome};
use crate::error::EngineError;
use crate::report::{RunReport, render_plan};
use crate::tools::{self, SystemTools, Toolbox};
use crate::ui::prelude::*;
use crate::validate::validate;

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Block device to reconcile (e.g. /dev/mmcblk0)
    #[arg(long)]
    pub device: Option<PathBuf>,
    /// Desired partition table file
    #[arg(short = 't', long)]
    pub table: Option<PathBuf>,
    /// Detached sha256 checksum of the table (defaults to <table>.sha256)
    #[arg(long)]
    pub checksum: Option<PathBuf>,
    /// Config file (defaults to /etc/partfit/config.toml when present)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Directory backup archives are staged in
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,
    /// Start sector of the boot partition
    #[arg(long)]
    pub boot_start: Option<u64>,
}

impl TargetArgs {
    /// Resolve and check everything that has to hold before the device is
    /// touched: inputs exist, the device is a block device, the table
    /// matches its checksum.
    fn load(self, dry_run: bool) -> Result<EngineConfig> {
        let file = FileConfig::load(self.config.as_deref())?;
        let config = EngineConfig::resolve(
            file,
            Overrides {
                device: self.device,
                table: self.table,
                checksum: self.checksum,
                boot_start: self.boot_start,
                staging_dir: self.staging_dir,
                dry_run,
            },
        )?;
        config.validate()?;
        verify_table(&config.table, &config.checksum)?;
        emit(
            Level::Debug,
            "config.loaded",
            &format!("Using {:?}", config),
            None,
        );
        Ok(config)
    }
}

fn ensure_root() -> Result<()> {
    if let sudo::RunningAs::User = sudo::check() {
        sudo::with_env(&["RUST_BACKTRACE"])
            .map_err(|e| anyhow::anyhow!("Failed to escalate privileges: {}", e))?;
    }
    Ok(())
}

pub fn handle_apply(target: TargetArgs, dry_run: bool) -> Result<()> {
    let config = target.load(dry_run)?;
    tools::preflight()?;

    if config.dry_run {
        emit(
            Level::Info,
            "run.dry_run",
            "*** DRY RUN MODE ENABLED - No changes will be made ***",
            None,
        );
    } else {
        ensure_root()?;
    }

    let system = SystemTools::new(config.dry_run);
    let engine = Engine::new(&config, Toolbox::uniform(&system));

    match engine.run()? {
        Outcome::NoResizeNeeded | Outcome::DryRun => Ok(()),
        Outcome::Resized(report) => {
            print_summary(&report)?;
            Ok(())
        }
    }
}

fn print_summary(report: &RunReport) -> Result<()> {
    let message = format!("Storage on {} reprovisioned", report.device);
    match get_output_format() {
        OutputFormat::Json => emit(
            Level::Success,
            "run.summary",
            &message,
            Some(serde_json::to_value(report)?),
        ),
        OutputFormat::Text => {
            separator();
            println!("{}", report.render());
            emit(Level::Success, "run.summary", &message, None);
        }
    }
    Ok(())
}

pub fn handle_plan(target: TargetArgs) -> Result<()> {
    let config = target.load(true)?;
    let system = SystemTools::new(true);
    let engine = Engine::new(&config, Toolbox::uniform(&system));

    let desired = engine.load_desired()?;
    let current = engine.read_current();
    let comparison = compare(&current.clone().unwrap_or_default(), desired.layout());
    let resize = needs_resize(current.as_ref(), desired.layout());

    match get_output_format() {
        OutputFormat::Json => emit(
            Level::Info,
            "plan.slots",
            "Slot comparison",
            Some(serde_json::json!({ "needs_resize": resize, "slots": comparison })),
        ),
        OutputFormat::Text => println!("{}", render_plan(&comparison)),
    }

    if !resize {
        emit(
            Level::Success,
            "plan.no_resize",
            &format!("{} already matches the desired layout", config.device.display()),
            None,
        );
        return Ok(());
    }

    validate(desired.layout(), engine.disk_sectors()?, config.boot_start)
        .map_err(EngineError::from)?;
    emit(
        Level::Warn,
        "plan.resize",
        &format!(
            "{} would be repartitioned; partitions that fail to resize lose data \
             not covered by a backup",
            config.device.display()
        ),
        None,
    );
    Ok(())
}

pub fn handle_check(target: TargetArgs) -> Result<()> {
    let config = target.load(true)?;
    tools::preflight()?;
    let system = SystemTools::new(true);
    let engine = Engine::new(&config, Toolbox::uniform(&system));

    let desired = engine.load_desired()?;
    let disk_sectors = engine.disk_sectors()?;
    validate(desired.layout(), disk_sectors, config.boot_start).map_err(EngineError::from)?;

    emit(
        Level::Success,
        "check.ok",
        &format!(
            "{} fits on {} ({} sectors) and has a boot partition at sector {}",
            config.table.display(),
            config.device.display(),
            disk_sectors,
            config.boot_start
        ),
        None,
    );
    Ok(())
}
