use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TABLE: &str = "\
label: gpt
boot : start=2048, size=524288, name=boot
data : start=526336, size=8388608, name=data
";

/// Scratch directory holding a desired table, its checksum and a fake
/// "device" that is a regular file.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write_table(&self, content: &str) -> Result<PathBuf> {
        let table = self.path().join("table.sfdisk");
        fs::write(&table, content)?;
        Ok(table)
    }

    pub fn write_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.path().join(name);
        fs::write(&path, content)?;
        Ok(path)
    }
}
