use std::path::PathBuf;
use thiserror::Error;

use crate::table::PartitionEntry;

/// Desired layout rejected before anything is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "partition {} ends at sector {} but the disk only has {disk_sectors} sectors",
        .entry.device_id,
        .entry.end_sector()
    )]
    OutOfBounds {
        entry: PartitionEntry,
        disk_sectors: u64,
    },

    #[error("no partition starts at the boot sector {boot_start}")]
    NoBootPartition { boot_start: u64 },

    #[error("{count} partitions start at the boot sector {boot_start}, expected one")]
    DuplicateBootPartition { boot_start: u64, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Precondition,
    Validation,
    Repartition,
    Provisioning,
}

impl ErrorCategory {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::Precondition => 2,
            ErrorCategory::Validation => 3,
            ErrorCategory::Repartition => 4,
            ErrorCategory::Provisioning => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Precondition => "precondition",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Repartition => "repartition",
            ErrorCategory::Provisioning => "provisioning",
        }
    }
}

/// Fatal errors. Anything that returns one of these stops the run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("device {} does not exist", .0.display())]
    MissingDevice(PathBuf),

    #[error("{} is not a block device", .0.display())]
    NotBlockDevice(PathBuf),

    #[error("partition table file {} does not exist", .0.display())]
    MissingTable(PathBuf),

    #[error("checksum file {} does not exist", .0.display())]
    MissingChecksum(PathBuf),

    #[error("checksum file {} does not contain a sha256 digest", .0.display())]
    MalformedChecksum(PathBuf),

    #[error("partition table checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("cannot read desired partition table: {0}")]
    UnreadableTable(String),

    #[error("cannot determine size of {device}: {reason}")]
    DiskSize { device: String, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("writing partition table to {device} failed: {reason}")]
    TableWrite { device: String, reason: String },

    #[error("kernel did not re-read the partition table of {device} after {attempts} attempts")]
    RereadExhausted { device: String, attempts: u32 },

    #[error("partition device {0} does not exist")]
    MissingPartitionDevice(String),

    #[error("partition {0} has no label in the desired table")]
    EmptyLabel(String),

    #[error("provisioning {device} failed: {reason}")]
    Provisioning { device: String, reason: String },
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::MissingDevice(_)
            | EngineError::NotBlockDevice(_)
            | EngineError::MissingTable(_)
            | EngineError::MissingChecksum(_)
            | EngineError::MalformedChecksum(_)
            | EngineError::ChecksumMismatch { .. }
            | EngineError::MissingTool(_)
            | EngineError::UnreadableTable(_) => ErrorCategory::Precondition,
            EngineError::DiskSize { .. } | EngineError::Validation(_) => ErrorCategory::Validation,
            EngineError::TableWrite { .. } | EngineError::RereadExhausted { .. } => {
                ErrorCategory::Repartition
            }
            EngineError::MissingPartitionDevice(_)
            | EngineError::EmptyLabel(_)
            | EngineError::Provisioning { .. } => ErrorCategory::Provisioning,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    pub(crate) fn provisioning(device: &str, err: anyhow::Error) -> Self {
        EngineError::Provisioning {
            device: device.to_string(),
            reason: format!("{err:#}"),
        }
    }
}

/// Category of an error reaching the binary boundary, `None` for
/// anything that is not a domain error.
pub fn classify(err: &anyhow::Error) -> Option<ErrorCategory> {
    if let Some(engine_err) = err.downcast_ref::<EngineError>() {
        return Some(engine_err.category());
    }
    err.downcast_ref::<ValidationError>()
        .map(|_| ErrorCategory::Validation)
}
