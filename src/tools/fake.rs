//! In-memory single-device stand-in for `SystemTools`.

use anyhow::{Result, anyhow, bail};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{
    Archiver, FilesystemChecker, FilesystemFormatter, FilesystemProbe, FilesystemResizer, FsType,
    MountManager, PartitionTableReader, PartitionTableWriter,
};
use crate::table::{DesiredLayout, Layout, PartitionEntry};

/// Partition node for `disk`: `mmcblk0` -> `mmcblk0p1`, `sda` -> `sda1`.
fn partition_node(disk: &str, part_num: u32) -> String {
    if disk.chars().last().unwrap_or(' ').is_numeric() {
        format!("{}p{}", disk, part_num)
    } else {
        format!("{}{}", disk, part_num)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    WriteTable,
    Reread,
    Mount(String),
    Unmount(String),
    Check(String),
    Resize(String),
    Format {
        device: String,
        fs: FsType,
        label: String,
    },
    Archive(String),
    Extract(String),
}

impl Call {
    pub fn is_write(&self) -> bool {
        !matches!(self, Call::Mount(_) | Call::Unmount(_))
    }
}

#[derive(Default)]
struct State {
    layout: Option<Layout>,
    disk_sectors: u64,
    filesystems: HashMap<String, FsType>,
    /// Relative paths present on each filesystem; a trailing `/` marks a directory.
    contents: HashMap<String, BTreeSet<String>>,
    mounted: HashMap<String, Option<PathBuf>>,
    missing_nodes: HashSet<String>,
    check_codes: HashMap<String, i32>,
    failing_resizes: HashSet<String>,
    failing_archives: HashSet<String>,
    failing_write: bool,
    reread_failures: u32,
    calls: Vec<Call>,
}

pub struct FakeDevice {
    disk: String,
    state: RefCell<State>,
}

impl FakeDevice {
    pub fn new(disk: &str, disk_sectors: u64) -> Self {
        Self {
            disk: disk.to_string(),
            state: RefCell::new(State {
                layout: Some(Layout::default()),
                disk_sectors,
                ..State::default()
            }),
        }
    }

    /// Partition the fake disk with `(start, size)` slots, numbered from 1.
    pub fn with_partitions(self, slots: &[(u64, u64)]) -> Self {
        let entries = slots
            .iter()
            .enumerate()
            .map(|(i, (start, size))| PartitionEntry {
                device_id: self.node(i as u32 + 1),
                start_sector: *start,
                size_sectors: *size,
                label: None,
            })
            .collect();
        self.state.borrow_mut().layout = Some(Layout::new(entries));
        self
    }

    pub fn with_filesystem(self, device: &str, fs: FsType, files: &[&str]) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.filesystems.insert(device.to_string(), fs);
            state.contents.insert(
                device.to_string(),
                files.iter().map(|f| f.to_string()).collect(),
            );
        }
        self
    }

    pub fn node(&self, number: u32) -> String {
        partition_node(&self.disk, number)
    }

    pub fn set_unreadable_table(&self) {
        self.state.borrow_mut().layout = None;
    }

    pub fn set_mounted(&self, device: &str) {
        self.state
            .borrow_mut()
            .mounted
            .insert(device.to_string(), None);
    }

    pub fn set_missing_node(&self, device: &str) {
        self.state
            .borrow_mut()
            .missing_nodes
            .insert(device.to_string());
    }

    pub fn set_check_code(&self, device: &str, code: i32) {
        self.state
            .borrow_mut()
            .check_codes
            .insert(device.to_string(), code);
    }

    pub fn set_failing_resize(&self, device: &str) {
        self.state
            .borrow_mut()
            .failing_resizes
            .insert(device.to_string());
    }

    pub fn set_failing_archive(&self, device: &str) {
        self.state
            .borrow_mut()
            .failing_archives
            .insert(device.to_string());
    }

    pub fn set_failing_write(&self) {
        self.state.borrow_mut().failing_write = true;
    }

    pub fn set_reread_failures(&self, failures: u32) {
        self.state.borrow_mut().reread_failures = failures;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn contents(&self, device: &str) -> BTreeSet<String> {
        self.state
            .borrow()
            .contents
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    pub fn filesystem(&self, device: &str) -> Option<FsType> {
        self.state.borrow().filesystems.get(device).cloned()
    }

    pub fn is_currently_mounted(&self, device: &str) -> bool {
        self.state.borrow().mounted.contains_key(device)
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn device_for_mount(&self, target: &Path) -> Option<String> {
        self.state
            .borrow()
            .mounted
            .iter()
            .find(|(_, mounted_at)| mounted_at.as_deref() == Some(target))
            .map(|(device, _)| device.clone())
    }
}

fn snapshot(dir: &Path) -> BTreeSet<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(dir).ok()?.to_string_lossy().to_string();
            Some(if e.file_type().is_dir() {
                format!("{rel}/")
            } else {
                rel
            })
        })
        .collect()
}

impl PartitionTableReader for FakeDevice {
    fn read_layout(&self, device: &str) -> Result<Layout> {
        if device != self.disk {
            bail!("no such disk {device}");
        }
        self.state
            .borrow()
            .layout
            .clone()
            .ok_or_else(|| {
                anyhow!("sfdisk: {device}: does not contain a recognized partition table")
            })
    }

    fn disk_sectors(&self, _device: &str) -> Result<u64> {
        Ok(self.state.borrow().disk_sectors)
    }
}

impl PartitionTableWriter for FakeDevice {
    fn write_table(&self, _device: &str, desired: &DesiredLayout) -> Result<()> {
        self.record(Call::WriteTable);
        if self.state.borrow().failing_write {
            bail!("sfdisk: failed to write disklabel");
        }
        let entries = desired
            .layout()
            .entries()
            .iter()
            .enumerate()
            .map(|(i, e)| PartitionEntry {
                device_id: self.node(i as u32 + 1),
                ..e.clone()
            })
            .collect();
        self.state.borrow_mut().layout = Some(Layout::new(entries));
        Ok(())
    }

    fn reread_table(&self, _device: &str) -> Result<()> {
        self.record(Call::Reread);
        let mut state = self.state.borrow_mut();
        if state.reread_failures > 0 {
            state.reread_failures -= 1;
            bail!("BLKRRPART: Device or resource busy");
        }
        Ok(())
    }
}

impl FilesystemProbe for FakeDevice {
    fn device_exists(&self, device: &str) -> bool {
        let state = self.state.borrow();
        !state.missing_nodes.contains(device)
            && state
                .layout
                .as_ref()
                .is_some_and(|l| l.entries().iter().any(|e| e.device_id == device))
    }

    fn filesystem_type(&self, device: &str) -> Result<Option<FsType>> {
        Ok(self.state.borrow().filesystems.get(device).cloned())
    }
}

impl MountManager for FakeDevice {
    fn is_mounted(&self, device: &str) -> Result<bool> {
        Ok(self.is_currently_mounted(device))
    }

    fn mount(&self, device: &str, target: &Path) -> Result<()> {
        self.record(Call::Mount(device.to_string()));
        if !self.device_exists(device) {
            bail!("mount: {device}: special device does not exist");
        }
        if self.is_currently_mounted(device) {
            bail!("mount: {device} already mounted");
        }
        if self.filesystem(device).is_none() {
            bail!("mount: {device}: wrong fs type, bad option, bad superblock");
        }
        for entry in self.contents(device) {
            let path = target.join(entry.trim_end_matches('/'));
            if entry.ends_with('/') {
                fs::create_dir_all(&path)?;
            } else {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, device)?;
            }
        }
        self.state
            .borrow_mut()
            .mounted
            .insert(device.to_string(), Some(target.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, device: &str) -> Result<()> {
        self.record(Call::Unmount(device.to_string()));
        let mounted_at = self
            .state
            .borrow_mut()
            .mounted
            .remove(device)
            .ok_or_else(|| anyhow!("umount: {device}: not mounted"))?;
        if let Some(target) = mounted_at {
            let files = snapshot(&target);
            self.state
                .borrow_mut()
                .contents
                .insert(device.to_string(), files);
        }
        Ok(())
    }
}

impl FilesystemChecker for FakeDevice {
    fn check(&self, device: &str, _fs: &FsType) -> Result<i32> {
        self.record(Call::Check(device.to_string()));
        Ok(self
            .state
            .borrow()
            .check_codes
            .get(device)
            .copied()
            .unwrap_or(0))
    }
}

impl FilesystemResizer for FakeDevice {
    fn resize(&self, device: &str, _fs: &FsType) -> Result<()> {
        self.record(Call::Resize(device.to_string()));
        if self.state.borrow().failing_resizes.contains(device) {
            bail!("resize: {device}: filesystem too fragmented");
        }
        Ok(())
    }
}

impl FilesystemFormatter for FakeDevice {
    fn format(&self, device: &str, fs: &FsType, label: &str) -> Result<()> {
        self.record(Call::Format {
            device: device.to_string(),
            fs: fs.clone(),
            label: label.to_string(),
        });
        let mut state = self.state.borrow_mut();
        state.filesystems.insert(device.to_string(), fs.clone());
        // mkfs.ext4 creates lost+found, mkfs.f2fs leaves the root empty
        let fresh = match fs {
            FsType::Ext4 => BTreeSet::from(["lost+found/".to_string()]),
            _ => BTreeSet::new(),
        };
        state.contents.insert(device.to_string(), fresh);
        Ok(())
    }
}

impl Archiver for FakeDevice {
    fn create(&self, source: &Path, archive: &Path) -> Result<()> {
        let device = self
            .device_for_mount(source)
            .ok_or_else(|| anyhow!("{} is not a mount point", source.display()))?;
        self.record(Call::Archive(device.clone()));

        let listing = snapshot(source).into_iter().collect::<Vec<_>>().join("\n");
        fs::write(archive, &listing)?;
        if self.state.borrow().failing_archives.contains(&device) {
            bail!("tar: {}: Wrote only 4096 of 10240 bytes", archive.display());
        }
        Ok(())
    }

    fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        let device = self
            .device_for_mount(destination)
            .ok_or_else(|| anyhow!("{} is not a mount point", destination.display()))?;
        self.record(Call::Extract(device));

        let listing = fs::read_to_string(archive)?;
        for entry in listing.lines().filter(|l| !l.is_empty()) {
            let path = destination.join(entry.trim_end_matches('/'));
            if entry.ends_with('/') {
                fs::create_dir_all(&path)?;
            } else {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, "restored")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_node_suffixes() {
        assert_eq!(partition_node("/dev/sda", 2), "/dev/sda2");
        assert_eq!(partition_node("/dev/mmcblk0", 1), "/dev/mmcblk0p1");
        assert_eq!(partition_node("/dev/nvme0n1", 3), "/dev/nvme0n1p3");
    }
}
