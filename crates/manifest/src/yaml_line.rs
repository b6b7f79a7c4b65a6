use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Utc};

/// `YYYY-MM-DD HH:MM:SS` — the only datetime rendering these manifests use.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// A single manifest row as written: either a JSON array (segment rows,
/// index entries, chunk actions) or a bare tag-kind string.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Array(Vec<serde_json::Value>),
    Scalar(String),
}

impl Record {
    /// Render as `- <json-or-bare>` the way `YAMLWriter.write` does: arrays
    /// go through `serde_json`, bare strings (tag names) are written as-is.
    pub fn to_line(&self) -> String {
        match self {
            Record::Array(values) => {
                format!("- {}", serde_json::to_string(values).unwrap_or_default())
            }
            Record::Scalar(s) => format!("- {s}"),
        }
    }
}

/// Parse a single manifest line, stripping the leading `"- "` (§9 tail-read
/// discipline). Arrays/objects are interpreted as JSON, single-quoted values
/// have their quotes stripped, everything else round-trips as a bare string.
pub fn parse_line(line: &str) -> Option<Record> {
    let line = line.trim();
    let rest = line.strip_prefix("- ")?;
    if rest.len() >= 2 {
        let bytes = rest.as_bytes();
        let first = bytes[0] as char;
        let last = bytes[bytes.len() - 1] as char;
        if (first == '[' && last == ']') || (first == '{' && last == '}') {
            if let Ok(serde_json::Value::Array(values)) = serde_json::from_str(rest) {
                return Some(Record::Array(values));
            }
        } else if first == '"' && last == '"' {
            if let Ok(s) = serde_json::from_str::<String>(rest) {
                return Some(Record::Scalar(s));
            }
        } else if first == '\'' && last == '\'' {
            return Some(Record::Scalar(rest[1..rest.len() - 1].to_string()));
        }
    }
    Some(Record::Scalar(rest.to_string()))
}

/// Read the last `max_lines` non-empty lines of `path`, newest first, by
/// walking backward from `SEEK_END` in 4 KiB blocks scanning for `\n` (§9).
/// Returns an empty vec when the file doesn't exist — a fresh manifest isn't
/// an error.
pub fn read_tail_lines(path: &Path, max_lines: usize) -> Vec<String> {
    const BLOCK: u64 = 4096;

    if max_lines == 0 {
        return Vec::new();
    }

    let Ok(mut file) = File::open(path) else {
        return Vec::new();
    };
    let Ok(metadata) = file.metadata() else {
        return Vec::new();
    };
    let len = metadata.len();
    if len == 0 {
        return Vec::new();
    }

    let mut pos = len;
    let mut buf: Vec<u8> = Vec::new();
    let mut newline_count = 0usize;

    while pos > 0 && newline_count <= max_lines {
        let read_size = BLOCK.min(pos);
        pos -= read_size;
        if file.seek(SeekFrom::Start(pos)).is_err() {
            break;
        }
        let mut block = vec![0u8; read_size as usize];
        if file.read_exact(&mut block).is_err() {
            break;
        }
        newline_count += block.iter().filter(|&&b| b == b'\n').count();
        block.extend_from_slice(&buf);
        buf = block;
    }

    let text = String::from_utf8_lossy(&buf).into_owned();
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }

    let start = lines.len().saturating_sub(max_lines);
    lines[start..].iter().rev().map(|l| l.to_string()).collect()
}

/// [`read_tail_lines`] followed by [`parse_line`], newest first, skipping
/// lines that fail to parse.
pub fn read_tail_records(path: &Path, max_lines: usize) -> Vec<Record> {
    read_tail_lines(path, max_lines)
        .into_iter()
        .filter_map(|line| parse_line(&line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn round_trips_array_record() {
        let record = Record::Array(vec![serde_json::json!(1), serde_json::json!("2023-01-01 00:00:00")]);
        let line = record.to_line();
        assert_eq!(line, "- [1,\"2023-01-01 00:00:00\"]");
        assert_eq!(parse_line(&line), Some(record));
    }

    #[test]
    fn bare_tag_name_round_trips_as_scalar() {
        let record = Record::Scalar("SOURCE-END".to_string());
        let line = record.to_line();
        assert_eq!(line, "- SOURCE-END");
        assert_eq!(parse_line(&line), Some(record));
    }

    #[test]
    fn missing_file_yields_no_tail_lines() {
        assert!(read_tail_lines(Path::new("/nonexistent/manifest.yaml"), 10).is_empty());
    }

    #[test]
    fn tail_lines_returns_newest_first_across_block_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segments.yaml");
        let mut file = File::create(&path).unwrap();
        for i in 0..2000 {
            writeln!(file, "- [{i}]").unwrap();
        }
        drop(file);

        let tail = read_tail_lines(&path, 3);
        assert_eq!(tail, vec!["- [1999]", "- [1998]", "- [1997]"]);
    }

    #[test]
    fn datetime_format_round_trips() {
        let dt: DateTime<Utc> = "2023-01-01T00:00:05Z".parse().unwrap();
        let formatted = format_datetime(dt);
        assert_eq!(formatted, "2023-01-01 00:00:05");
        assert_eq!(parse_datetime(&formatted).unwrap(), dt);
    }
}
