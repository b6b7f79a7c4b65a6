use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use hls_index::{Item, Segment, TagKind};

fn millis(duration: f64) -> Duration {
    Duration::milliseconds((duration * 1000.0).round() as i64)
}

/// An ordered, extend-only queue of segments and control tags (§4.3).
///
/// Once an item has been popped via [`SegmentsList::popleft`], the list
/// represents only the *middle* onward: [`SegmentsList::extendleft`] is then
/// forbidden, mirroring the source's assumption that nothing to the left of
/// what's already been consumed can ever come back.
#[derive(Debug, Default)]
pub struct SegmentsList {
    items: VecDeque<Item>,
    pub last_removed_item: Option<Item>,
    pub last_removed_segment: Option<Segment>,
}

impl SegmentsList {
    pub fn new() -> Self {
        SegmentsList::default()
    }

    pub fn from_items(items: VecDeque<Item>) -> Self {
        SegmentsList {
            items,
            last_removed_item: None,
            last_removed_segment: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    pub fn push_back(&mut self, item: Item) {
        self.items.push_back(item);
    }

    pub fn popleft(&mut self) -> Option<Item> {
        let item = self.items.pop_front()?;
        if let Some(segment) = item.as_segment() {
            self.last_removed_segment = Some(segment.clone());
        }
        self.last_removed_item = Some(item.clone());
        Some(item)
    }

    pub fn first_segment(&self) -> Option<&Segment> {
        self.items.iter().find_map(Item::as_segment)
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.items.iter().rev().find_map(Item::as_segment)
    }

    fn last_known_segment(&self) -> Option<Segment> {
        self.last_segment()
            .cloned()
            .or_else(|| self.last_removed_segment.clone())
    }

    /// Whether the last item is already a terminal (`*_END`) or
    /// discontinuity tag — appending another would duplicate it.
    pub fn tail_is_terminal_or_discontinuity(&self) -> bool {
        matches!(self.items.back(), Some(Item::Tag(t)) if t.is_terminal_or_discontinuity())
    }

    /// Merge a freshly fetched playlist window into this list (§4.3).
    ///
    /// Finds the last known segment (from this list, or the last one popped
    /// off it) inside `right`. If found, every item after the match is
    /// appended, with segment datetimes re-derived from the last known
    /// segment's end so the merge doesn't depend on `right` restating
    /// `EXT-X-PROGRAM-DATE-TIME`. If no overlap is found and `force` is
    /// false, nothing is mutated and `false` is returned — the caller must
    /// treat this as a discontinuity. If `force` is true, a
    /// `SOURCE_DISCONTINUITY` tag is appended (unless the tail is already
    /// terminal/discontinuity) followed by the entirety of `right`.
    pub fn extend(&mut self, mut right: VecDeque<Item>, force: bool) -> bool {
        if let Some(last) = self.last_known_segment() {
            let pos = right
                .iter()
                .position(|item| matches!(item.as_segment(), Some(s) if s.checksum == last.checksum));
            if let Some(pos) = pos {
                for _ in 0..=pos {
                    right.pop_front();
                }
                let mut running = last.datetime.map(|dt| dt + millis(last.duration));
                for item in right {
                    match item {
                        Item::Segment(mut segment) => {
                            if let Some(dt) = running {
                                running = Some(dt + millis(segment.duration));
                                segment.datetime = Some(dt);
                            }
                            self.items.push_back(Item::Segment(segment));
                        }
                        tag => self.items.push_back(tag),
                    }
                }
                return true;
            }
        }

        if force {
            if !self.tail_is_terminal_or_discontinuity() {
                self.items.push_back(Item::Tag(TagKind::SourceDiscontinuity));
            }
            self.items.extend(right);
            return true;
        }

        false
    }

    /// Mirror of [`SegmentsList::extend`] run backwards: prepend items from
    /// `left` that precede this list's first known segment, deriving their
    /// datetimes working backward from it. Only valid when nothing has ever
    /// been popped off this list.
    pub fn extendleft(&mut self, left: VecDeque<Item>) -> bool {
        assert!(
            self.last_removed_item.is_none() && self.last_removed_segment.is_none(),
            "extendleft is only valid on a list nothing has been popped from"
        );

        let first = match self.first_segment().cloned() {
            Some(f) => f,
            None => return false,
        };

        let pos = left
            .iter()
            .position(|item| matches!(item.as_segment(), Some(s) if s.checksum == first.checksum));
        let pos = match pos {
            Some(p) => p,
            None => return false,
        };

        let mut prefix: Vec<Item> = left.into_iter().take(pos).collect();
        let mut running = first.datetime;
        for item in prefix.iter_mut().rev() {
            if let Item::Segment(segment) = item
                && let Some(dt) = running
            {
                let start = dt - millis(segment.duration);
                segment.datetime = Some(start);
                running = Some(start);
            }
        }

        for item in prefix.into_iter().rev() {
            self.items.push_front(item);
        }
        true
    }

    /// Drop every element up to and including the first match (by checksum)
    /// of `until`. Returns the number of items removed (0 if not found). If
    /// `until` carries a datetime and surviving items lack one, datetimes are
    /// propagated forward from `until`'s end.
    pub fn trimleft(&mut self, until: &Segment) -> usize {
        let pos = self
            .items
            .iter()
            .position(|item| matches!(item.as_segment(), Some(s) if s.checksum == until.checksum));
        let pos = match pos {
            Some(p) => p,
            None => return 0,
        };

        let mut removed = 0;
        for _ in 0..=pos {
            if self.popleft().is_some() {
                removed += 1;
            }
        }

        if let Some(until_dt) = until.datetime {
            let mut running = until_dt + millis(until.duration);
            for item in self.items.iter_mut() {
                if let Item::Segment(segment) = item {
                    if segment.datetime.is_none() {
                        segment.datetime = Some(running);
                    }
                    running = segment.datetime.unwrap() + millis(segment.duration);
                }
            }
        }

        removed
    }

    /// Walk the list from the tail backwards, assigning
    /// `segment.datetime = end - duration` and advancing `end` by the same
    /// amount — used once, after wall-clock recovery (§4.4).
    pub fn apply_end_datetime(&mut self, mut end: DateTime<Utc>) {
        for item in self.items.iter_mut().rev() {
            if let Item::Segment(segment) = item {
                let start = end - millis(segment.duration);
                segment.datetime = Some(start);
                end = start;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hls_index::SegmentStatus;

    fn segment(checksum: u32, seq: u64, duration: f64, dt: Option<&str>) -> Segment {
        let mut s = Segment::new(
            checksum,
            format!("https://example.com/{checksum}.ts"),
            duration,
            dt.map(|d| d.parse::<DateTime<Utc>>().unwrap()),
            Some(seq),
        );
        s.status = SegmentStatus::Done;
        s
    }

    fn deque(items: Vec<Item>) -> VecDeque<Item> {
        items.into_iter().collect()
    }

    #[test]
    fn extend_finds_overlap_and_derives_datetimes() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(1, 0, 6.0, Some("2023-01-01T00:00:00Z"))));
        list.push_back(Item::Segment(segment(2, 1, 6.0, Some("2023-01-01T00:00:06Z"))));

        let right = deque(vec![
            Item::Segment(segment(2, 1, 6.0, None)),
            Item::Segment(segment(3, 2, 6.0, None)),
            Item::Segment(segment(4, 3, 6.0, None)),
        ]);

        assert!(list.extend(right, false));
        assert_eq!(list.len(), 4);
        let last = list.last_segment().unwrap();
        assert_eq!(last.checksum, 4);
        assert_eq!(last.datetime.unwrap().to_rfc3339(), "2023-01-01T00:00:18+00:00");
    }

    #[test]
    fn extend_without_overlap_and_no_force_fails_without_mutating() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(1, 0, 6.0, Some("2023-01-01T00:00:00Z"))));
        let right = deque(vec![Item::Segment(segment(99, 5, 6.0, None))]);
        assert!(!list.extend(right, false));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn extend_with_force_appends_discontinuity_then_everything() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(1, 0, 6.0, Some("2023-01-01T00:00:00Z"))));
        let right = deque(vec![Item::Segment(segment(99, 5, 6.0, None))]);
        assert!(list.extend(right, true));
        assert_eq!(list.len(), 3);
        assert_eq!(list.iter().nth(1).unwrap().as_tag(), Some(TagKind::SourceDiscontinuity));
    }

    #[test]
    fn extend_force_does_not_duplicate_existing_terminal_tag() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(1, 0, 6.0, Some("2023-01-01T00:00:00Z"))));
        list.push_back(Item::Tag(TagKind::SourceEnd));
        let right = deque(vec![Item::Segment(segment(2, 1, 6.0, None))]);
        list.extend(right, true);
        let tags: Vec<_> = list.iter().filter_map(Item::as_tag).collect();
        assert_eq!(tags, vec![TagKind::SourceEnd]);
    }

    #[test]
    fn trimleft_removes_through_match_and_propagates_datetime() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(1, 0, 6.0, Some("2023-01-01T00:00:00Z"))));
        list.push_back(Item::Segment(segment(2, 1, 6.0, None)));
        list.push_back(Item::Segment(segment(3, 2, 6.0, None)));

        let removed = list.trimleft(&segment(1, 0, 6.0, Some("2023-01-01T00:00:00Z")));
        assert_eq!(removed, 1);
        assert_eq!(list.len(), 2);
        let first = list.first_segment().unwrap();
        assert_eq!(first.datetime.unwrap().to_rfc3339(), "2023-01-01T00:00:06+00:00");
    }

    #[test]
    fn trimleft_with_no_match_removes_nothing() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(1, 0, 6.0, None)));
        assert_eq!(list.trimleft(&segment(99, 0, 6.0, None)), 0);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn extendleft_prepends_and_derives_datetime_backwards() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(3, 2, 6.0, Some("2023-01-01T00:00:12Z"))));

        let left = deque(vec![
            Item::Segment(segment(1, 0, 6.0, None)),
            Item::Segment(segment(2, 1, 6.0, None)),
            Item::Segment(segment(3, 2, 6.0, Some("2023-01-01T00:00:12Z"))),
        ]);

        assert!(list.extendleft(left));
        assert_eq!(list.len(), 3);
        let first = list.first_segment().unwrap();
        assert_eq!(first.checksum, 1);
        assert_eq!(first.datetime.unwrap().to_rfc3339(), "2023-01-01T00:00:00+00:00");
    }

    #[test]
    fn extendleft_panics_once_something_has_been_popped() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(1, 0, 6.0, None)));
        list.popleft();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            list.extendleft(VecDeque::new())
        }));
        assert!(result.is_err());
    }

    #[test]
    fn apply_end_datetime_walks_backward() {
        let mut list = SegmentsList::new();
        list.push_back(Item::Segment(segment(1, 0, 6.0, None)));
        list.push_back(Item::Segment(segment(2, 1, 6.0, None)));
        list.apply_end_datetime("2023-01-01T00:00:12Z".parse().unwrap());
        let segments: Vec<_> = list.iter().filter_map(Item::as_segment).collect();
        assert_eq!(segments[0].datetime.unwrap().to_rfc3339(), "2023-01-01T00:00:00+00:00");
        assert_eq!(segments[1].datetime.unwrap().to_rfc3339(), "2023-01-01T00:00:06+00:00");
    }
}
