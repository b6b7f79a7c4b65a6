use chrono::{DateTime, Utc};
use std::time::Instant;

use crate::epoch::guess_epoch_from_url;
use crate::tag::TagKind;

/// Lifecycle state of a segment's download (§3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Done,
    Cancelled,
}

/// An ordered media unit discovered in an upstream playlist (§3).
///
/// Identity is the CRC32 checksum of the *raw* URL string as it appeared in
/// the playlist, before absolutisation — this is what lets a segment survive
/// being re-served behind a different base URL across polls.
#[derive(Debug, Clone)]
pub struct Segment {
    pub checksum: u32,
    pub url: String,
    pub duration: f64,
    pub datetime: Option<DateTime<Utc>>,
    pub source_sequence: Option<u64>,
    /// Monotonic local id, assigned on admission to the pending queue (§4.9),
    /// zero until then.
    pub sequence: u64,
    /// Heuristic UTC epoch seconds parsed from the URL, 0 if no heuristic matched.
    pub epoch: u64,
    /// Output-relative path, assigned by a `Formatter` once the segment has a datetime.
    pub path: Option<String>,
    pub status: SegmentStatus,
    /// Absolute deadline after which a still-pending segment is cancelled.
    pub deadline: Option<Instant>,
}

impl Segment {
    pub fn new(
        checksum: u32,
        url: String,
        duration: f64,
        datetime: Option<DateTime<Utc>>,
        source_sequence: Option<u64>,
    ) -> Self {
        let epoch = guess_epoch_from_url(&url);
        Segment {
            checksum,
            url,
            duration,
            datetime,
            source_sequence,
            sequence: 0,
            epoch,
            path: None,
            status: SegmentStatus::Pending,
            deadline: None,
        }
    }

    pub fn end_datetime(&self) -> Option<DateTime<Utc>> {
        self.datetime
            .map(|dt| dt + chrono::Duration::milliseconds((self.duration * 1000.0).round() as i64))
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.checksum == other.checksum
    }
}

/// A position in the ordered stream: either a captured segment or a control tag (§3).
#[derive(Debug, Clone)]
pub enum Item {
    Segment(Segment),
    Tag(TagKind),
}

impl Item {
    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            Item::Segment(s) => Some(s),
            Item::Tag(_) => None,
        }
    }

    pub fn as_segment_mut(&mut self) -> Option<&mut Segment> {
        match self {
            Item::Segment(s) => Some(s),
            Item::Tag(_) => None,
        }
    }

    pub fn as_tag(&self) -> Option<TagKind> {
        match self {
            Item::Tag(t) => Some(*t),
            Item::Segment(_) => None,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        self.as_segment().and_then(|s| s.datetime)
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Item::Segment(a), Item::Segment(b)) => a == b,
            (Item::Tag(a), Item::Tag(b)) => a == b,
            _ => false,
        }
    }
}
