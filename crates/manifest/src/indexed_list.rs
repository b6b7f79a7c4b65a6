use std::path::PathBuf;

use serde_json::Value;

use crate::file_writer::FileWriter;
use crate::yaml_line::{read_tail_records, Record};

/// How many recent lines `load()` scans backward to recover state on
/// startup — matches the source's hard-coded `max_lines=20`.
const TAIL_SCAN_LINES: usize = 20;

pub const LIST_FILENAME: &str = "segments.yaml";
pub const INDEX_FILENAME: &str = "segments.index.yaml";

/// A pair of append-only files: a list of items, and a sparse index of
/// `(key, canonical_key, byte_position)` triples recording where each new
/// key-bucket began in the list (§3, §4.6).
///
/// On construction both files are tail-scanned to recover `last_item`,
/// `last_object` (the most recent non-tag row) and `last_key`, so a restarted
/// process can resume writing without re-deriving state from the full file.
pub struct IndexedListWriter {
    list: FileWriter,
    index: Option<FileWriter>,
    last_key: Option<String>,
    last_item: Option<Record>,
    last_object: Option<Vec<Value>>,
}

impl IndexedListWriter {
    pub fn new(root: impl Into<PathBuf>, dirname: impl Into<PathBuf>, with_index: bool) -> Self {
        let root = root.into();
        let dirname = dirname.into();
        let list = FileWriter::with_path(root.clone(), dirname.join(LIST_FILENAME));
        let index = with_index.then(|| FileWriter::with_path(root, dirname.join(INDEX_FILENAME)));
        let mut writer = IndexedListWriter {
            list,
            index,
            last_key: None,
            last_item: None,
            last_object: None,
        };
        writer.load();
        writer
    }

    pub fn dirname(&self) -> &std::path::Path {
        self.list.dirname()
    }

    /// Re-point both files at a new directory and reload recovered state.
    pub fn set_dirname(&mut self, dirname: impl Into<PathBuf>) {
        let dirname = dirname.into();
        self.list.set_dirname(dirname.clone());
        if let Some(index) = &mut self.index {
            index.set_dirname(dirname);
        }
        self.load();
    }

    pub fn last_item(&self) -> Option<&Record> {
        self.last_item.as_ref()
    }

    pub fn last_object(&self) -> Option<&[Value]> {
        self.last_object.as_deref()
    }

    pub fn last_key(&self) -> Option<&str> {
        self.last_key.as_deref()
    }

    fn load(&mut self) {
        self.last_item = None;
        self.last_object = None;
        for record in read_tail_records(&self.list.full_path(), TAIL_SCAN_LINES) {
            if self.last_item.is_none() {
                self.last_item = Some(record.clone());
            }
            if let Record::Array(values) = record {
                self.last_object = Some(values);
                break;
            }
        }

        self.last_key = None;
        if let Some(index) = &self.index {
            for record in read_tail_records(&index.full_path(), TAIL_SCAN_LINES) {
                if let Record::Array(values) = record
                    && let Some(key) = values.first().and_then(Value::as_str)
                {
                    self.last_key = Some(key.to_string());
                    break;
                }
            }
        }
    }

    fn update_index(&mut self, key: &str, canonical_key: Option<Value>) -> std::io::Result<()> {
        if self.last_key.as_deref() == Some(key) {
            return Ok(());
        }
        let Some(index) = &mut self.index else {
            return Ok(());
        };
        let position = self.list.tell()?;
        index.write_line(
            &Record::Array(vec![
                Value::String(key.to_string()),
                canonical_key.unwrap_or(Value::Null),
                Value::from(position),
            ])
            .to_line(),
        )?;
        self.last_key = Some(key.to_string());
        Ok(())
    }

    /// Write `item`, updating the index first if `key` is a new bucket.
    /// `key = None` leaves the index untouched even if one exists.
    pub fn write(&mut self, item: Record, key: Option<&str>, canonical_key: Option<Value>) -> std::io::Result<()> {
        if let Some(key) = key {
            self.update_index(key, canonical_key)?;
        }
        self.list.write_line(&item.to_line())?;
        if let Record::Array(values) = &item {
            self.last_object = Some(values.clone());
        }
        self.last_item = Some(item);
        Ok(())
    }

    pub fn close(&mut self) {
        self.list.close();
        if let Some(index) = &mut self.index {
            index.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_index_only_on_key_transition() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = IndexedListWriter::new(dir.path(), "", true);

        writer.write(Record::Array(vec![Value::from(0)]), Some("2023-01-01"), None).unwrap();
        writer.write(Record::Array(vec![Value::from(1)]), Some("2023-01-01"), None).unwrap();
        writer.write(Record::Array(vec![Value::from(2)]), Some("2023-01-02"), None).unwrap();
        writer.close();

        let index_lines = std::fs::read_to_string(dir.path().join(INDEX_FILENAME)).unwrap();
        assert_eq!(index_lines.lines().count(), 2);
    }

    #[test]
    fn recovers_last_item_and_key_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = IndexedListWriter::new(dir.path(), "", true);
            writer.write(Record::Array(vec![Value::from(0)]), Some("2023-01-01"), None).unwrap();
            writer.write(Record::Scalar("SOURCE-END".to_string()), None, None).unwrap();
            writer.close();
        }

        let reopened = IndexedListWriter::new(dir.path(), "", true);
        assert_eq!(reopened.last_item(), Some(&Record::Scalar("SOURCE-END".to_string())));
        assert_eq!(reopened.last_object(), Some(&[Value::from(0)][..]));
        assert_eq!(reopened.last_key(), Some("2023-01-01"));
    }

    #[test]
    fn no_existing_files_recovers_to_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IndexedListWriter::new(dir.path(), "", true);
        assert!(writer.last_item().is_none());
        assert!(writer.last_key().is_none());
    }
}
