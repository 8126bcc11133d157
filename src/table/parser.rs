use regex::Regex;
use std::sync::OnceLock;

use super::PartitionEntry;

/// Result of parsing one table line. Comments, headers and rows whose
/// start/size fields are not integers are `Skip`, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Entry(PartitionEntry),
    Skip,
}

fn field_separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"[\s:=,]+").expect("separator pattern is valid"))
}

fn name_field() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| {
        Regex::new(r#"\bname\s*=\s*(?:"([^"]*)"|([^\s,]+))"#).expect("name pattern is valid")
    })
}

/// Split a line on whitespace, `:`, `=` and `,`.
pub fn tokenize(line: &str) -> Vec<&str> {
    field_separators()
        .split(line.trim())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse one line of the table grammar.
///
/// Fields are positional: `<device> start <start> size <size> ...`, the
/// layout `sfdisk -d` prints. The label is taken from a `name=` field.
pub fn parse_row(line: &str) -> Row {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Row::Skip;
    }

    let tokens = tokenize(trimmed);
    let (Some(device), Some(start), Some(size)) = (tokens.first(), tokens.get(2), tokens.get(4))
    else {
        return Row::Skip;
    };
    let (Ok(start_sector), Ok(size_sectors)) = (start.parse::<u64>(), size.parse::<u64>()) else {
        return Row::Skip;
    };

    let label = name_field().captures(trimmed).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    });

    Row::Entry(PartitionEntry {
        device_id: (*device).to_string(),
        start_sector,
        size_sectors,
        label,
    })
}
