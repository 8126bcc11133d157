use anyhow::{Context, Result};
use duct::cmd;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{
    Archiver, CommandExecutor, FilesystemChecker, FilesystemFormatter, FilesystemProbe,
    FilesystemResizer, FsType, MountManager, PartitionTableReader, PartitionTableWriter,
};
use crate::common::device::is_block_device;
use crate::table::{DesiredLayout, Layout};

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// blkid exit status when the device carries no recognizable signature.
const BLKID_NOT_FOUND: i32 = 2;

/// Tool implementations backed by util-linux, e2fsprogs, f2fs-tools and tar.
///
/// Queries run even in dry-run mode; anything that changes the device goes
/// through the `CommandExecutor`.
pub struct SystemTools {
    executor: CommandExecutor,
}

impl SystemTools {
    pub fn new(dry_run: bool) -> Self {
        Self {
            executor: CommandExecutor::new(dry_run),
        }
    }
}

/// Source column of every line in a mounts table.
pub fn parse_mounted_sources(mounts: &str) -> Vec<String> {
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn canonical(path: &str) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path))
}

impl PartitionTableReader for SystemTools {
    fn read_layout(&self, device: &str) -> Result<Layout> {
        let dump = cmd!("sfdisk", "-d", device)
            .stderr_capture()
            .read()
            .with_context(|| format!("failed to dump partition table of {device}"))?;
        Ok(Layout::parse(&dump))
    }

    fn disk_sectors(&self, device: &str) -> Result<u64> {
        let blocks = cmd!("sfdisk", "-s", device)
            .stderr_capture()
            .read()
            .with_context(|| format!("failed to query size of {device}"))?;
        let blocks: u64 = blocks
            .trim()
            .parse()
            .with_context(|| format!("unexpected sfdisk size output {:?}", blocks.trim()))?;
        // sfdisk reports 1 KiB blocks
        Ok(blocks * 2)
    }
}

impl PartitionTableWriter for SystemTools {
    fn write_table(&self, device: &str, desired: &DesiredLayout) -> Result<()> {
        self.executor.run_with_input(
            Command::new("sfdisk").args(["--no-reread", "--no-tell-kernel", device]),
            desired.script(),
        )
    }

    fn reread_table(&self, device: &str) -> Result<()> {
        self.executor
            .run(Command::new("blockdev").args(["--rereadpt", device]))?;
        self.executor.run(Command::new("udevadm").arg("settle"))
    }
}

impl FilesystemProbe for SystemTools {
    fn device_exists(&self, device: &str) -> bool {
        is_block_device(Path::new(device))
    }

    fn filesystem_type(&self, device: &str) -> Result<Option<FsType>> {
        let output = cmd!("blkid", "-o", "value", "-s", "TYPE", device)
            .stdout_capture()
            .stderr_null()
            .unchecked()
            .run()
            .context("failed to run blkid")?;

        match output.status.code() {
            Some(0) => Ok(FsType::from_probe(&String::from_utf8_lossy(&output.stdout))),
            Some(BLKID_NOT_FOUND) => Ok(None),
            code => anyhow::bail!("blkid failed on {device} with status {code:?}"),
        }
    }
}

impl MountManager for SystemTools {
    fn is_mounted(&self, device: &str) -> Result<bool> {
        let mounts = fs::read_to_string(PROC_MOUNTS).context("failed to read mount table")?;
        let wanted = canonical(device);
        Ok(parse_mounted_sources(&mounts)
            .iter()
            .any(|source| source == device || canonical(source) == wanted))
    }

    fn mount(&self, device: &str, target: &Path) -> Result<()> {
        self.executor
            .run(Command::new("mount").arg("-o").arg("rw").arg(device).arg(target))
    }

    fn unmount(&self, device: &str) -> Result<()> {
        self.executor.run(Command::new("umount").arg(device))
    }
}

impl FilesystemChecker for SystemTools {
    fn check(&self, device: &str, fs: &FsType) -> Result<i32> {
        let mut command = match fs {
            FsType::Ext4 => {
                let mut c = Command::new("e2fsck");
                c.args(["-f", "-y", device]);
                c
            }
            FsType::F2fs => {
                let mut c = Command::new("fsck.f2fs");
                c.args(["-f", device]);
                c
            }
            FsType::Other(name) => anyhow::bail!("no consistency check for {name}"),
        };
        self.executor.run_status(&mut command)
    }
}

impl FilesystemResizer for SystemTools {
    fn resize(&self, device: &str, fs: &FsType) -> Result<()> {
        match fs {
            FsType::Ext4 => self.executor.run(Command::new("resize2fs").arg(device)),
            FsType::F2fs => self.executor.run(Command::new("resize.f2fs").arg(device)),
            FsType::Other(name) => anyhow::bail!("cannot resize {name}"),
        }
    }
}

impl FilesystemFormatter for SystemTools {
    fn format(&self, device: &str, fs: &FsType, label: &str) -> Result<()> {
        match fs {
            FsType::Ext4 => self
                .executor
                .run(Command::new("mkfs.ext4").args(["-F", "-L", label, device])),
            FsType::F2fs => self
                .executor
                .run(Command::new("mkfs.f2fs").args(["-f", "-l", label, device])),
            FsType::Other(name) => anyhow::bail!("cannot format {name}"),
        }
    }
}

impl Archiver for SystemTools {
    fn create(&self, source: &Path, archive: &Path) -> Result<()> {
        self.executor.run(
            Command::new("tar")
                .arg("-czf")
                .arg(archive)
                .arg("-C")
                .arg(source)
                .arg("."),
        )
    }

    fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        self.executor.run(
            Command::new("tar")
                .arg("-xzf")
                .arg(archive)
                .arg("-C")
                .arg(destination),
        )
    }
}
