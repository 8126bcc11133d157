use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::error::EngineError;

/// First token of a `sha256sum`-style line, if it looks like a digest.
pub fn parse_checksum_file(content: &str) -> Option<String> {
    let digest = content.split_whitespace().next()?;
    (digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| digest.to_ascii_lowercase())
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Refuse a table whose SHA-256 does not match its detached checksum file.
pub fn verify_table(table: &Path, checksum: &Path) -> Result<(), EngineError> {
    let data = fs::read(table).map_err(|_| EngineError::MissingTable(table.to_path_buf()))?;
    let content = fs::read_to_string(checksum)
        .map_err(|_| EngineError::MissingChecksum(checksum.to_path_buf()))?;
    let expected = parse_checksum_file(&content)
        .ok_or_else(|| EngineError::MalformedChecksum(checksum.to_path_buf()))?;

    let actual = sha256_hex(&data);
    if actual != expected {
        return Err(EngineError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}
