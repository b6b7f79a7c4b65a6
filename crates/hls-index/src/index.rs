use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::segment::Item;

/// An alternate rendition pointer from `EXT-X-MEDIA`.
#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub uri: String,
    pub params: BTreeMap<String, String>,
    pub source: String,
}

/// A variant stream pointer from `EXT-X-STREAM-INF`.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub source: String,
}

/// A fully parsed playlist (§3).
#[derive(Debug, Clone, Default)]
pub struct Index {
    pub base: Option<String>,
    pub segments: VecDeque<Item>,
    pub media: Vec<MediaDescriptor>,
    pub streams: Vec<StreamDescriptor>,
    pub unprocessed: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub complete: bool,
    pub datetime: Option<DateTime<Utc>>,
    pub sequence: Option<u64>,
    pub target_duration: Option<f64>,
}

impl Index {
    /// The first `Segment` in playlist order, skipping tags.
    pub fn first_segment(&self) -> Option<&crate::segment::Segment> {
        self.segments.iter().find_map(Item::as_segment)
    }
}
