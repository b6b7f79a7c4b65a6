//! Append-only, crash-resumable YAML-line manifests (§3, §4.6, §9).
//!
//! Everything here is built on the same discipline: append a line, never
//! rewrite one, and recover state on startup by tailing the file backward
//! instead of replaying it from the beginning.

mod chunker;
mod file_writer;
mod indexed_list;
mod segments_writer;
mod yaml_line;

pub use chunker::{ChunkAction, ChunkActionKind, ChunkBoundary, ChunkList, Chunker};
pub use file_writer::FileWriter;
pub use indexed_list::IndexedListWriter;
pub use segments_writer::SegmentsListWriter;
pub use yaml_line::{format_datetime, parse_datetime, parse_line, read_tail_lines, read_tail_records, Record, DATETIME_FORMAT};
