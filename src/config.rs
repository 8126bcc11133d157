use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::device::is_block_device;
use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::table::BOOT_START;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/partfit/config.toml";
pub const DEFAULT_STAGING_DIR: &str = "/tmp/backup";

/// Optional on-disk defaults. Every field can be overridden on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub device: Option<String>,
    pub table: Option<String>,
    pub checksum: Option<String>,
    pub boot_start: Option<u64>,
    pub staging_dir: Option<String>,
    pub reread_attempts: Option<u32>,
    pub reread_delay_ms: Option<u64>,
}

impl FileConfig {
    /// Load `explicit` (which must exist), or the default file if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Command-line values layered over `FileConfig`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub device: Option<PathBuf>,
    pub table: Option<PathBuf>,
    pub checksum: Option<PathBuf>,
    pub boot_start: Option<u64>,
    pub staging_dir: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub device: PathBuf,
    pub table: PathBuf,
    pub checksum: PathBuf,
    pub boot_start: u64,
    pub staging_dir: PathBuf,
    pub reread_attempts: u32,
    pub reread_delay: Duration,
    pub dry_run: bool,
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

impl EngineConfig {
    pub const DEFAULT_REREAD_ATTEMPTS: u32 = 10;
    pub const DEFAULT_REREAD_DELAY_MS: u64 = 1000;

    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self> {
        let device = overrides
            .device
            .or_else(|| file.device.as_deref().map(expand))
            .context("no target device given (use --device or set `device` in the config file)")?;
        let table = overrides
            .table
            .or_else(|| file.table.as_deref().map(expand))
            .context("no partition table given (use --table or set `table` in the config file)")?;
        let checksum = overrides
            .checksum
            .or_else(|| file.checksum.as_deref().map(expand))
            .unwrap_or_else(|| default_checksum_path(&table));

        Ok(Self {
            device,
            table,
            checksum,
            boot_start: overrides
                .boot_start
                .or(file.boot_start)
                .unwrap_or(BOOT_START),
            staging_dir: overrides
                .staging_dir
                .or_else(|| file.staging_dir.as_deref().map(expand))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR)),
            reread_attempts: file
                .reread_attempts
                .unwrap_or(Self::DEFAULT_REREAD_ATTEMPTS),
            reread_delay: Duration::from_millis(
                file.reread_delay_ms
                    .unwrap_or(Self::DEFAULT_REREAD_DELAY_MS),
            ),
            dry_run: overrides.dry_run,
        })
    }

    pub fn device_str(&self) -> String {
        self.device.to_string_lossy().into_owned()
    }

    pub fn reread_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.reread_attempts, self.reread_delay)
    }

    /// Precondition checks. Nothing has been touched when these fail.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.device.exists() {
            return Err(EngineError::MissingDevice(self.device.clone()));
        }
        if !is_block_device(&self.device) {
            return Err(EngineError::NotBlockDevice(self.device.clone()));
        }
        if !self.table.is_file() {
            return Err(EngineError::MissingTable(self.table.clone()));
        }
        if !self.checksum.is_file() {
            return Err(EngineError::MissingChecksum(self.checksum.clone()));
        }
        Ok(())
    }
}

/// `table.sfdisk` -> `table.sfdisk.sha256`
pub fn default_checksum_path(table: &Path) -> PathBuf {
    let mut name = table.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}
