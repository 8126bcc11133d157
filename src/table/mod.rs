//! Partition table model and the line grammar shared by `sfdisk -d` dumps
//! and desired-table files.

mod parser;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

pub use parser::{Row, parse_row};

/// Start sector the boot partition is anchored at.
pub const BOOT_START: u64 = 2048;

/// One row of a partition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    /// Block device path, or a symbolic slot name in a desired-table file
    pub device_id: String,
    pub start_sector: u64,
    pub size_sectors: u64,
    pub label: Option<String>,
}

impl PartitionEntry {
    pub fn end_sector(&self) -> u64 {
        self.start_sector.saturating_add(self.size_sectors)
    }

    pub fn is_boot(&self, boot_start: u64) -> bool {
        self.start_sector == boot_start
    }

    /// Label with surrounding whitespace removed, `None` when missing or blank.
    pub fn label(&self) -> Option<&str> {
        self.label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

/// Ordered snapshot of the valid entries of a partition table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    entries: Vec<PartitionEntry>,
}

impl Layout {
    pub fn new(entries: Vec<PartitionEntry>) -> Self {
        Self { entries }
    }

    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| match parse_row(line) {
                Row::Entry(entry) => Some(entry),
                Row::Skip => None,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slot lookup: entries are joined across layouts by start sector.
    pub fn find_slot(&self, start_sector: u64) -> Option<&PartitionEntry> {
        self.entries.iter().find(|e| e.start_sector == start_sector)
    }
}

/// Layout read from a target-table file, keeping the raw text so the
/// writer can hand the exact file to the partitioning tool.
#[derive(Debug, Clone)]
pub struct DesiredLayout {
    layout: Layout,
    script: String,
}

impl DesiredLayout {
    pub fn parse(script: impl Into<String>) -> Self {
        let script = script.into();
        let layout = Layout::parse(&script);
        Self { layout, script }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("reading partition table {}", path.display()))?;
        Ok(Self::parse(script))
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}
