use std::collections::VecDeque;
use std::time::{Duration, Instant};

use hls_index::{Item, SegmentStatus};

/// Default pending-segment timeout (§4.9): a promised download past its
/// deadline is cancelled on the next [`PendingQueue::flush`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// The in-flight queue a single feed's downloads are admitted to (§4.9).
///
/// Items are admitted via [`PendingQueue::promise`] in arrival order and
/// only leave the front of the queue via [`PendingQueue::flush`], once their
/// status is final or their deadline has passed — this is what keeps
/// manifest writes strictly ordered by `sequence` even though downloads
/// themselves may complete out of order (§5).
///
/// Adopts the corrected semantics from the spec's open questions: flush pops
/// while the head is finalised *or* timed out, not the inverted condition
/// present in the source.
pub struct PendingQueue {
    pending: VecDeque<Item>,
    timeout: Duration,
    next_sequence: u64,
}

impl Default for PendingQueue {
    fn default() -> Self {
        PendingQueue::new(DEFAULT_TIMEOUT)
    }
}

impl PendingQueue {
    pub fn new(timeout: Duration) -> Self {
        PendingQueue {
            pending: VecDeque::new(),
            timeout,
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Admit an item: segments are assigned a monotonic `sequence` and a
    /// deadline and marked pending; tags are final on arrival.
    pub fn promise(&mut self, mut item: Item) {
        if let Item::Segment(segment) = &mut item {
            segment.status = SegmentStatus::Pending;
            segment.deadline = Some(Instant::now() + self.timeout);
            segment.sequence = self.next_sequence;
            self.next_sequence += 1;
        }
        self.pending.push_back(item);
    }

    /// Mark the first pending segment matching `checksum` as done.
    pub fn done(&mut self, checksum: u32) -> bool {
        self.set_status(checksum, SegmentStatus::Done)
    }

    /// Mark the first pending segment matching `checksum` as cancelled
    /// (download exhausted its retries).
    pub fn cancel(&mut self, checksum: u32) -> bool {
        self.set_status(checksum, SegmentStatus::Cancelled)
    }

    fn set_status(&mut self, checksum: u32, status: SegmentStatus) -> bool {
        for item in self.pending.iter_mut() {
            if let Item::Segment(segment) = item
                && segment.checksum == checksum
            {
                segment.status = status;
                return true;
            }
        }
        false
    }

    /// Drain from the front every item whose status is final, or whose
    /// deadline has passed (timing it out as cancelled), stopping at the
    /// first item that is still genuinely pending. Returned in admission
    /// order, ready to be written through to the manifest.
    pub fn flush(&mut self) -> Vec<Item> {
        let now = Instant::now();
        let mut drained = Vec::new();

        loop {
            let ready = match self.pending.front() {
                None => false,
                Some(Item::Tag(_)) => true,
                Some(Item::Segment(segment)) => {
                    segment.status != SegmentStatus::Pending
                        || segment.deadline.is_some_and(|deadline| now >= deadline)
                }
            };
            if !ready {
                break;
            }

            let mut item = self.pending.pop_front().expect("checked by ready");
            if let Item::Segment(segment) = &mut item
                && segment.status == SegmentStatus::Pending
            {
                tracing::warn!(checksum = segment.checksum, "pending segment timed out, cancelling");
                segment.status = SegmentStatus::Cancelled;
            }
            drained.push(item);
        }

        drained
    }
}
