//! Narrow interfaces over the external partitioning, filesystem and
//! archive tools. `SystemTools` shells out; tests use an in-memory device.

mod executor;
#[cfg(test)]
pub mod fake;
mod system;

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::error::EngineError;
use crate::table::{DesiredLayout, Layout};

use executor::CommandExecutor;
pub use system::SystemTools;

/// Filesystem detected on, or chosen for, a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FsType {
    /// ext2/3/4, all handled by e2fsprogs
    Ext4,
    F2fs,
    Other(String),
}

impl FsType {
    pub fn from_probe(value: &str) -> Option<Self> {
        match value.trim() {
            "" => None,
            "ext2" | "ext3" | "ext4" => Some(FsType::Ext4),
            "f2fs" => Some(FsType::F2fs),
            other => Some(FsType::Other(other.to_string())),
        }
    }

    /// Highest consistency-check exit status that still allows a resize.
    /// e2fsck exits 1 after correcting errors; fsck.f2fs has no such state.
    pub fn max_clean_check_status(&self) -> Option<i32> {
        match self {
            FsType::Ext4 => Some(1),
            FsType::F2fs => Some(0),
            FsType::Other(_) => None,
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsType::Ext4 => write!(f, "ext4"),
            FsType::F2fs => write!(f, "f2fs"),
            FsType::Other(name) => write!(f, "{name}"),
        }
    }
}

pub trait PartitionTableReader {
    fn read_layout(&self, device: &str) -> Result<Layout>;

    /// Total size of the device in 512-byte sectors.
    fn disk_sectors(&self, device: &str) -> Result<u64>;
}

pub trait PartitionTableWriter {
    /// Replace the whole partition table of `device`.
    fn write_table(&self, device: &str, desired: &DesiredLayout) -> Result<()>;

    fn reread_table(&self, device: &str) -> Result<()>;
}

pub trait FilesystemProbe {
    fn device_exists(&self, device: &str) -> bool;

    /// `None` when no filesystem signature is present.
    fn filesystem_type(&self, device: &str) -> Result<Option<FsType>>;
}

pub trait MountManager {
    fn is_mounted(&self, device: &str) -> Result<bool>;
    fn mount(&self, device: &str, target: &Path) -> Result<()>;
    fn unmount(&self, device: &str) -> Result<()>;
}

pub trait FilesystemChecker {
    /// Run the consistency check and return its raw exit status.
    fn check(&self, device: &str, fs: &FsType) -> Result<i32>;
}

pub trait FilesystemResizer {
    /// Grow or shrink the filesystem to fill its partition.
    fn resize(&self, device: &str, fs: &FsType) -> Result<()>;
}

pub trait FilesystemFormatter {
    fn format(&self, device: &str, fs: &FsType, label: &str) -> Result<()>;
}

pub trait Archiver {
    fn create(&self, source: &Path, archive: &Path) -> Result<()>;
    fn extract(&self, archive: &Path, destination: &Path) -> Result<()>;
}

/// One handle per tool interface, borrowed for a single run.
#[derive(Clone, Copy)]
pub struct Toolbox<'a> {
    pub reader: &'a dyn PartitionTableReader,
    pub writer: &'a dyn PartitionTableWriter,
    pub probe: &'a dyn FilesystemProbe,
    pub mounts: &'a dyn MountManager,
    pub checker: &'a dyn FilesystemChecker,
    pub resizer: &'a dyn FilesystemResizer,
    pub formatter: &'a dyn FilesystemFormatter,
    pub archiver: &'a dyn Archiver,
}

impl<'a> Toolbox<'a> {
    /// Toolbox where a single value implements every interface.
    pub fn uniform<T>(tools: &'a T) -> Self
    where
        T: PartitionTableReader
            + PartitionTableWriter
            + FilesystemProbe
            + MountManager
            + FilesystemChecker
            + FilesystemResizer
            + FilesystemFormatter
            + Archiver,
    {
        Self {
            reader: tools,
            writer: tools,
            probe: tools,
            mounts: tools,
            checker: tools,
            resizer: tools,
            formatter: tools,
            archiver: tools,
        }
    }

    /// Unmount `device` if it is mounted. Mount state is always queried
    /// fresh, never cached.
    pub fn ensure_unmounted(&self, device: &str) -> Result<()> {
        if self.mounts.is_mounted(device)? {
            self.mounts.unmount(device)?;
        }
        Ok(())
    }
}

/// External programs `SystemTools` invokes.
pub const REQUIRED_TOOLS: &[&str] = &[
    "sfdisk",
    "blockdev",
    "udevadm",
    "blkid",
    "mount",
    "umount",
    "e2fsck",
    "resize2fs",
    "mkfs.ext4",
    "fsck.f2fs",
    "resize.f2fs",
    "mkfs.f2fs",
    "tar",
];

/// Fail with the first required tool missing from `PATH`.
pub fn preflight() -> Result<(), EngineError> {
    match REQUIRED_TOOLS
        .iter()
        .find(|tool| which::which(tool).is_err())
    {
        Some(missing) => Err(EngineError::MissingTool((*missing).to_string())),
        None => Ok(()),
    }
}
