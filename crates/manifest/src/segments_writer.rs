use std::path::PathBuf;

use hls_index::{Formatter, IndexError, Item, Segment, TagKind};
use serde_json::Value;

use crate::chunker::{Chunker, ChunkBoundary};
use crate::indexed_list::IndexedListWriter;
use crate::yaml_line::{format_datetime, Record};

fn io_err(e: IndexError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

fn segment_row(segment: &Segment) -> Record {
    Record::Array(vec![
        Value::from(segment.sequence),
        segment.source_sequence.map(Value::from).unwrap_or(Value::Null),
        Value::from(segment.duration),
        segment.datetime.map(|dt| Value::String(format_datetime(dt))).unwrap_or(Value::Null),
        segment.path.clone().map(Value::String).unwrap_or(Value::Null),
        Value::from(segment.checksum),
    ])
}

/// Writes a single feed's segment stream to `segments.yaml` (plus a sparse
/// index when the formatter carries an `index_key_template`), rolling to a
/// new output directory whenever the formatter's `base` changes, and — for
/// the root writer only — fanning each segment out to a flat set of
/// coarser-grained sub-manifests and the owned [`Chunker`] (§4.6).
///
/// Mirrors the source's hierarchy: a feed with an N-component path template
/// gets one master writer plus `N - 1` sibling sub-writers, one per
/// intermediate directory depth — not a recursive tree of writers. Only the
/// root writer owns a `Chunker`; every depth in the hierarchy sees the same
/// item stream, but chunking happens once, at the root, or chunks would be
/// double-written once per sub-manifest depth.
pub struct SegmentsListWriter {
    formatter: Formatter,
    chunker: Option<Chunker>,
    indexed: IndexedListWriter,
    current_dir: Option<String>,
    sublists: Vec<SegmentsListWriter>,
}

impl SegmentsListWriter {
    pub fn new(formatter: Formatter, chunker: Chunker, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let depth = formatter.depth();
        let mut writer = Self::leaf(formatter.split(0), Some(chunker), root.clone());
        for d in 1..depth {
            writer.sublists.push(Self::leaf(formatter.split(d), None, root.clone()));
        }
        writer
    }

    fn leaf(formatter: Formatter, chunker: Option<Chunker>, root: PathBuf) -> Self {
        let with_index = formatter.index_key_template.is_some();
        SegmentsListWriter {
            indexed: IndexedListWriter::new(root, "", with_index),
            formatter,
            chunker,
            current_dir: None,
            sublists: Vec::new(),
        }
    }

    /// Point this writer (and its sub-writers) at the directory a resumed
    /// item belongs under, recovering `last_key`/`last_item` for it.
    pub fn resume_from(&mut self, segment: &Segment) -> Result<(), IndexError> {
        let dir = self.formatter.base(segment)?;
        self.current_dir = Some(dir.clone());
        self.indexed.set_dirname(&dir);
        for sub in &mut self.sublists {
            sub.resume_from(segment)?;
        }
        Ok(())
    }

    /// Reconstruct the most recently written segment row from the tail of
    /// the master manifest, for startup deduplication against a freshly
    /// fetched playlist. The reconstructed segment has no `url` — manifests
    /// never store one — so it is only fit for checksum/datetime comparison.
    pub fn last_segment(&self) -> Option<Segment> {
        let values = self.indexed.last_object()?;
        let sequence = values.first()?.as_u64()?;
        let source_sequence = values.get(1).and_then(Value::as_u64);
        let duration = values.get(2)?.as_f64()?;
        let datetime = values
            .get(3)
            .and_then(Value::as_str)
            .and_then(crate::yaml_line::parse_datetime);
        let path = values.get(4).and_then(Value::as_str).map(str::to_string);
        let checksum = values.get(5)?.as_u64()? as u32;

        let mut segment = Segment::new(checksum, String::new(), duration, datetime, source_sequence);
        segment.sequence = sequence;
        segment.path = path;
        Some(segment)
    }

    /// The kind name of the most recently written tag, if the last row was
    /// a tag rather than a segment.
    pub fn last_tag_name(&self) -> Option<String> {
        match self.indexed.last_item()? {
            Record::Scalar(name) => Some(name.clone()),
            Record::Array(_) => None,
        }
    }

    fn roll_directory_if_changed(&mut self, segment: &Segment) -> std::io::Result<()> {
        if segment.datetime.is_none() {
            return Ok(());
        }
        let new_dir = self.formatter.base(segment).map_err(io_err)?;
        match &self.current_dir {
            Some(current) if *current == new_dir => {}
            Some(_) => {
                self.indexed.write(Record::Scalar(TagKind::ChunkEnd.name().to_string()), None, None)?;
                self.current_dir = Some(new_dir.clone());
                self.indexed.set_dirname(&new_dir);
            }
            None => {
                self.current_dir = Some(new_dir.clone());
                self.indexed.set_dirname(&new_dir);
            }
        }
        Ok(())
    }

    fn on_chunk_boundary(&self, boundary: &ChunkBoundary) {
        tracing::debug!(
            path = %boundary.path,
            prev_path = ?boundary.prev_path,
            start = %boundary.start,
            end = %boundary.end,
            "chunk closed"
        );
    }

    /// Admit one item from the merged segment/tag stream. Returns any chunk
    /// boundaries the shared [`Chunker`] closed as a result — empty unless
    /// this is the root writer, since only it drives the chunker.
    pub fn write(&mut self, item: &Item) -> std::io::Result<Vec<ChunkBoundary>> {
        let mut boundaries = Vec::new();
        match item {
            Item::Segment(segment) => {
                self.roll_directory_if_changed(segment)?;
                let key = self.formatter.index_key(segment).map_err(io_err)?;
                let canonical_key = segment.datetime.map(|dt| Value::String(format_datetime(dt)));
                self.indexed.write(segment_row(segment), key.as_deref(), canonical_key)?;

                if segment.path.is_some()
                    && segment.datetime.is_some()
                    && let Some(chunker) = self.chunker.as_mut()
                {
                    boundaries = chunker.write(segment)?;
                    for boundary in &boundaries {
                        self.on_chunk_boundary(boundary);
                    }
                }
            }
            Item::Tag(tag) => {
                let is_duplicate = matches!(self.indexed.last_item(), Some(Record::Scalar(name)) if name == tag.name());
                if !is_duplicate {
                    self.indexed.write(Record::Scalar(tag.name().to_string()), None, None)?;
                }
                if tag.is_terminal_or_discontinuity()
                    && let Some(chunker) = self.chunker.as_mut()
                    && let Some(boundary) = chunker.end()?
                {
                    self.on_chunk_boundary(&boundary);
                    boundaries.push(boundary);
                }
            }
        }

        for sub in &mut self.sublists {
            sub.write(item)?;
        }
        Ok(boundaries)
    }

    pub fn close(&mut self) {
        self.indexed.close();
        for sub in &mut self.sublists {
            sub.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hls_index::SegmentStatus;

    fn segment(checksum: u32, seq: u64, dt: &str, path: &str) -> Segment {
        let mut s = Segment::new(checksum, format!("https://example.com/{checksum}.ts"), 6.0, Some(dt.parse().unwrap()), Some(seq));
        s.sequence = seq;
        s.path = Some(path.to_string());
        s.status = SegmentStatus::Done;
        s
    }

    fn formatter() -> Formatter {
        Formatter::new("%Y-%m-%d/%H/{seq}.ts", "ts")
    }

    #[test]
    fn first_write_never_emits_chunk_end() {
        let dir = tempfile::tempdir().unwrap();
        let chunker = Chunker::new(dir.path(), 6.0);
        let mut writer = SegmentsListWriter::new(formatter(), chunker, dir.path());

        writer.write(&Item::Segment(segment(1, 0, "2023-01-01T00:00:00Z", "2023-01-01/00/0.ts"))).unwrap();
        writer.close();

        let contents = std::fs::read_to_string(dir.path().join("segments.yaml")).unwrap();
        assert!(!contents.contains("CHUNK-END"));
    }

    #[test]
    fn directory_change_emits_chunk_end_and_rolls_dirname() {
        let dir = tempfile::tempdir().unwrap();
        let chunker = Chunker::new(dir.path(), 6.0);
        let mut writer = SegmentsListWriter::new(formatter(), chunker, dir.path());

        writer.write(&Item::Segment(segment(1, 0, "2023-01-01T00:00:00Z", "2023-01-01/00/0.ts"))).unwrap();
        writer.write(&Item::Segment(segment(2, 1, "2023-01-01T01:00:00Z", "2023-01-01/01/1.ts"))).unwrap();
        writer.close();

        let first_bucket = std::fs::read_to_string(dir.path().join("2023-01-01/00/segments.yaml")).unwrap();
        assert!(first_bucket.contains("CHUNK-END"));
        assert!(std::fs::metadata(dir.path().join("2023-01-01/01/segments.yaml")).is_ok());
    }

    #[test]
    fn root_writer_produces_a_date_keyed_index() {
        let dir = tempfile::tempdir().unwrap();
        let chunker = Chunker::new(dir.path(), 6.0);
        let mut writer = SegmentsListWriter::new(formatter(), chunker, dir.path());

        writer.write(&Item::Segment(segment(1, 0, "2023-01-01T00:00:00Z", "2023-01-01/00/0.ts"))).unwrap();
        writer.close();

        let index = std::fs::read_to_string(dir.path().join("segments.index.yaml")).unwrap();
        assert!(index.contains("2023-01-01"));
    }

    #[test]
    fn duplicate_tag_is_not_written_twice() {
        let dir = tempfile::tempdir().unwrap();
        let chunker = Chunker::new(dir.path(), 6.0);
        let mut writer = SegmentsListWriter::new(formatter(), chunker, dir.path());

        writer.write(&Item::Tag(TagKind::SourceEnd)).unwrap();
        writer.write(&Item::Tag(TagKind::SourceEnd)).unwrap();
        writer.close();

        let contents = std::fs::read_to_string(dir.path().join("segments.yaml")).unwrap();
        assert_eq!(contents.matches("SOURCE-END").count(), 1);
    }
}
