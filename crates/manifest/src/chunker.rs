use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use hls_index::Segment;
use serde_json::Value;

use crate::file_writer::FileWriter;
use crate::yaml_line::{format_datetime, read_tail_records, Record};

fn millis(duration: f64) -> Duration {
    Duration::milliseconds((duration * 1000.0).round() as i64)
}

pub const CHUNK_LIST_FILENAME: &str = "chunks.yaml";
const DEFAULT_CHUNK_DIRNAME: &str = "chunks";
const DEFAULT_CHUNK_PATH_TEMPLATE: &str = "%Y-%m-%d/%H%M%S.yaml";
const TAIL_SCAN_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkActionKind {
    Start,
    End,
}

impl ChunkActionKind {
    fn name(self) -> &'static str {
        match self {
            ChunkActionKind::Start => "start",
            ChunkActionKind::End => "end",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "start" => Some(ChunkActionKind::Start),
            "end" => Some(ChunkActionKind::End),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkAction {
    pub action: ChunkActionKind,
    pub sequence: u64,
    pub datetime: DateTime<Utc>,
    pub path: String,
}

/// The append-only `chunks.yaml` index of chunk start/end boundaries (§4.6).
///
/// Sequence numbers advance asymmetrically: a `start` reuses the previous
/// action's sequence unless that action was an `end`, in which case it
/// advances by one — so a `start`/`end` pair always shares a sequence number.
pub struct ChunkList {
    file: FileWriter,
    last_action: Option<ChunkAction>,
    prev_chunk_end: Option<ChunkAction>,
}

impl ChunkList {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        let file = FileWriter::with_path(root, CHUNK_LIST_FILENAME);
        let mut list = ChunkList {
            file,
            last_action: None,
            prev_chunk_end: None,
        };
        list.load();
        list
    }

    fn load(&mut self) {
        self.last_action = None;
        self.prev_chunk_end = None;
        let records = read_tail_records(&self.file.full_path(), TAIL_SCAN_LINES);
        let mut iter = records.into_iter().filter_map(|r| Self::parse_action(&r));
        let Some(first) = iter.next() else { return };
        if first.action == ChunkActionKind::End {
            self.prev_chunk_end = Some(first.clone());
        } else {
            for action in iter {
                if action.action == ChunkActionKind::End {
                    self.prev_chunk_end = Some(action);
                    break;
                }
            }
        }
        self.last_action = Some(first);
    }

    fn parse_action(record: &Record) -> Option<ChunkAction> {
        let Record::Array(values) = record else { return None };
        let action = ChunkActionKind::from_name(values.first()?.as_str()?)?;
        let sequence = values.get(1)?.as_u64()?;
        let datetime = crate::yaml_line::parse_datetime(values.get(2)?.as_str()?)?;
        let path = values.get(3)?.as_str()?.to_string();
        Some(ChunkAction { action, sequence, datetime, path })
    }

    pub fn last_action(&self) -> Option<&ChunkAction> {
        self.last_action.as_ref()
    }

    pub fn prev_chunk_end_path(&self) -> Option<String> {
        self.prev_chunk_end.as_ref().map(|a| a.path.clone())
    }

    pub fn write(&mut self, action: ChunkActionKind, datetime: DateTime<Utc>, path: &str) -> std::io::Result<ChunkAction> {
        let sequence = match &self.last_action {
            Some(last) if last.action == ChunkActionKind::End => last.sequence + 1,
            Some(last) => last.sequence,
            None => 0,
        };
        self.file.write_line(
            &Record::Array(vec![
                Value::String(action.name().to_string()),
                Value::from(sequence),
                Value::String(format_datetime(datetime)),
                Value::String(path.to_string()),
            ])
            .to_line(),
        )?;

        if let Some(prev) = &self.last_action
            && prev.action == ChunkActionKind::End
        {
            self.prev_chunk_end = Some(prev.clone());
        }
        let record = ChunkAction { action, sequence, datetime, path: path.to_string() };
        self.last_action = Some(record.clone());
        Ok(record)
    }
}

/// A chunk that just closed: `path` spans `[start, end)`, preceded by
/// `prev_path` (the chunk closed immediately before it, if any).
#[derive(Debug, Clone)]
pub struct ChunkBoundary {
    pub prev_path: Option<String>,
    pub path: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Aggregates contiguous segments into chunks of at least `min_duration`
/// seconds each, writing the `start`/`end` boundary actions to a
/// [`ChunkList`] and the per-chunk segment rows to files under
/// `chunks/<strftime>.yaml` (§4.6).
pub struct Chunker {
    root: PathBuf,
    chunk_dirname: PathBuf,
    chunk_path_template: String,
    min_duration: f64,
    list: ChunkList,
    chunk_file: Option<FileWriter>,
    start: Option<DateTime<Utc>>,
    path: Option<String>,
    current_last: Option<(DateTime<Utc>, f64)>,
}

impl Chunker {
    pub fn new(root: impl Into<PathBuf>, min_duration: f64) -> Self {
        let root = root.into();
        let list = ChunkList::new(&root);
        let mut chunker = Chunker {
            root,
            chunk_dirname: PathBuf::from(DEFAULT_CHUNK_DIRNAME),
            chunk_path_template: DEFAULT_CHUNK_PATH_TEMPLATE.to_string(),
            min_duration,
            list,
            chunk_file: None,
            start: None,
            path: None,
            current_last: None,
        };
        chunker.resume();
        chunker
    }

    /// If the last recorded action left a chunk open (process crashed or was
    /// restarted mid-chunk), reopen it and recover its last written segment
    /// by tail-reading the chunk file, so the next write picks up correctly.
    fn resume(&mut self) {
        let Some(action) = self.list.last_action().cloned() else { return };
        if action.action != ChunkActionKind::Start {
            return;
        }
        self.start = Some(action.datetime);
        self.path = Some(action.path.clone());
        self.chunk_file = Some(FileWriter::with_path(self.root.clone(), &action.path));
        let file = self.chunk_file.as_ref().expect("just set");
        self.current_last = read_tail_records(&file.full_path(), 1).into_iter().find_map(|r| {
            let Record::Array(values) = r else { return None };
            let datetime = crate::yaml_line::parse_datetime(values.get(2)?.as_str()?)?;
            let duration = values.get(1)?.as_f64()?;
            Some((datetime, duration))
        });
    }

    fn projected_end(&self) -> Option<DateTime<Utc>> {
        self.start.map(|s| s + millis(self.min_duration))
    }

    fn open_chunk(&mut self, datetime: DateTime<Utc>) -> std::io::Result<()> {
        let rel_path = self.chunk_dirname.join(datetime.format(&self.chunk_path_template).to_string());
        let rel_path_str = rel_path.to_string_lossy().replace('\\', "/");
        self.list.write(ChunkActionKind::Start, datetime, &rel_path_str)?;
        self.chunk_file = Some(FileWriter::with_path(self.root.clone(), &rel_path));
        self.start = Some(datetime);
        self.path = Some(rel_path_str);
        self.current_last = None;
        Ok(())
    }

    fn close_chunk(&mut self) -> std::io::Result<Option<ChunkBoundary>> {
        let (Some(start), Some(path)) = (self.start, self.path.clone()) else {
            return Ok(None);
        };
        let end = self.current_last.map(|(dt, dur)| dt + millis(dur)).unwrap_or(start);
        let prev_path = self.list.prev_chunk_end_path();
        self.list.write(ChunkActionKind::End, end, &path)?;
        if let Some(chunk_file) = &mut self.chunk_file {
            chunk_file.close();
        }
        self.chunk_file = None;
        self.start = None;
        self.path = None;
        self.current_last = None;
        Ok(Some(ChunkBoundary { prev_path, path, start, end }))
    }

    /// Admit a segment, rolling chunks as needed. May yield up to two
    /// boundaries: one for a chunk closed because this segment's datetime
    /// fell outside it, and one if writing this segment itself closes the
    /// chunk it was just admitted into.
    pub fn write(&mut self, segment: &Segment) -> std::io::Result<Vec<ChunkBoundary>> {
        let datetime = segment
            .datetime
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "segment has no datetime"))?;
        let mut boundaries = Vec::new();

        let needs_new_chunk = self.start.is_none() || self.projected_end().is_none_or(|pe| pe <= datetime);
        if needs_new_chunk {
            if self.start.is_some()
                && let Some(boundary) = self.close_chunk()?
            {
                boundaries.push(boundary);
            }
            self.open_chunk(datetime)?;
        }

        let chunk_file = self.chunk_file.as_mut().expect("just opened above");
        chunk_file.write_line(
            &Record::Array(vec![
                Value::from(segment.sequence),
                Value::from(segment.duration),
                Value::String(format_datetime(datetime)),
                segment.path.clone().map(Value::String).unwrap_or(Value::Null),
            ])
            .to_line(),
        )?;
        self.current_last = Some((datetime, segment.duration));

        let end_dt = datetime + millis(segment.duration);
        if self.projected_end().is_some_and(|pe| end_dt >= pe)
            && let Some(boundary) = self.close_chunk()?
        {
            boundaries.push(boundary);
        }

        Ok(boundaries)
    }

    /// Force the currently open chunk closed — called on source-end and
    /// discontinuity tags so a break in the stream always ends a chunk.
    pub fn end(&mut self) -> std::io::Result<Option<ChunkBoundary>> {
        self.close_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hls_index::SegmentStatus;

    fn segment(sequence: u64, duration: f64, dt: &str, path: &str) -> Segment {
        let mut s = Segment::new(sequence as u32, format!("https://example.com/{sequence}.ts"), duration, Some(dt.parse().unwrap()), Some(sequence));
        s.sequence = sequence;
        s.path = Some(path.to_string());
        s.status = SegmentStatus::Done;
        s
    }

    #[test]
    fn aggregates_segments_until_min_duration_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = Chunker::new(dir.path(), 12.0);

        let b1 = chunker.write(&segment(0, 6.0, "2023-01-01T00:00:00Z", "a.ts")).unwrap();
        assert!(b1.is_empty());
        let b2 = chunker.write(&segment(1, 6.0, "2023-01-01T00:00:06Z", "b.ts")).unwrap();
        assert_eq!(b2.len(), 1);
        assert_eq!(b2[0].start.to_rfc3339(), "2023-01-01T00:00:00+00:00");
        assert_eq!(b2[0].end.to_rfc3339(), "2023-01-01T00:00:12+00:00");

        let b3 = chunker.write(&segment(2, 6.0, "2023-01-01T00:00:12Z", "c.ts")).unwrap();
        assert!(b3.is_empty());
    }

    #[test]
    fn end_force_closes_open_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = Chunker::new(dir.path(), 60.0);
        chunker.write(&segment(0, 6.0, "2023-01-01T00:00:00Z", "a.ts")).unwrap();
        let boundary = chunker.end().unwrap().expect("chunk was open");
        assert_eq!(boundary.end.to_rfc3339(), "2023-01-01T00:00:06+00:00");
        assert!(chunker.end().unwrap().is_none());
    }

    #[test]
    fn resumes_open_chunk_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut chunker = Chunker::new(dir.path(), 60.0);
            chunker.write(&segment(0, 6.0, "2023-01-01T00:00:00Z", "a.ts")).unwrap();
        }

        let mut resumed = Chunker::new(dir.path(), 60.0);
        assert_eq!(resumed.start, Some("2023-01-01T00:00:00Z".parse().unwrap()));
        let boundary = resumed.write(&segment(1, 6.0, "2023-01-01T00:00:06Z", "b.ts")).unwrap();
        assert!(boundary.is_empty() || boundary[0].end.to_rfc3339() == "2023-01-01T00:00:12+00:00");
    }
}
