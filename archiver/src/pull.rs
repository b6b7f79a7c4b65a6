//! The per-feed pull loop (§4.4, §4.9, §5).
//!
//! One call to [`run_feed`] owns everything for a single feed: its
//! `SegmentsList`, `PendingQueue`, manifest writers, chunker, download
//! scheduler, and notifier. Nothing here is shared across feeds — the
//! supervisor (`supervisor.rs`) is what gives each feed its own task.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hls_index::{Formatter, Index, Item, Segment, SegmentStatus, TagKind};
use manifest::{ChunkBoundary, Chunker, SegmentsListWriter};
use notifier::Notifier;
use reqwest::Client;
use scheduler::Scheduler;
use segments_list::{PendingQueue, SegmentsList};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;
use crate::downloader::{download_to_file, fetch_playlist};
use crate::error::ArchiverError;
use crate::retry::{cancellable_sleep, retry_with_backoff, RetryAction, RetryPolicy};

/// Default minimum chunk duration (§3 Chunk, §4.6): 300 s, matching the
/// pending-segment timeout's order of magnitude.
const DEFAULT_MIN_CHUNK_DURATION: f64 = 300.0;
const WALL_CLOCK_POLL_INTERVAL: Duration = Duration::from_millis(300);
const DEFAULT_CHUNK_DIRNAME: &str = "chunks";
const DEFAULT_CHUNK_PATH_TEMPLATE: &str = "%Y-%m-%d/%H%M%S.yaml";

struct DownloadOutcome {
    checksum: u32,
    done: bool,
}

fn base_url(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) => url[..=idx].to_string(),
        None => url.to_string(),
    }
}

/// Parse an HTTP `Date` header (RFC1123), falling back to the wall clock if
/// the header is absent or malformed (§4.4).
fn parse_http_date(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| chrono::NaiveDateTime::parse_from_str(v, "%a, %d %b %Y %H:%M:%S GMT").ok())
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}

/// Poll `url` at a fixed cadence until its body changes or attempts are
/// exhausted, and derive the wall-clock instant the change occurred at as
/// the midpoint between the last-unchanged and first-changed responses
/// (§4.4). A free function taking `url` explicitly, per §13 open question 1.
pub async fn detect_change(
    client: &Client,
    url: &str,
    target_duration: f64,
    stop: &CancellationToken,
) -> Result<(String, DateTime<Utc>), ArchiverError> {
    let max_polls = ((target_duration * 3.0) / 0.3).ceil().max(1.0) as u32;

    let (first_body, first_date) = fetch_playlist(client, url, stop).await?;
    let mut last_unchanged_at = parse_http_date(first_date.as_deref());

    for _ in 0..max_polls {
        cancellable_sleep(WALL_CLOCK_POLL_INTERVAL, stop).await;
        if stop.is_cancelled() {
            return Err(ArchiverError::ChangeDetectFailed);
        }

        let (body, date) = fetch_playlist(client, url, stop).await?;
        if body != first_body {
            let changed_at = parse_http_date(date.as_deref());
            let end_datetime = changed_at - (changed_at - last_unchanged_at) / 2;
            return Ok((body, end_datetime));
        }
        last_unchanged_at = parse_http_date(date.as_deref());
    }

    Err(ArchiverError::ChangeDetectFailed)
}

fn submit_download(
    scheduler: &mut Scheduler<DownloadOutcome>,
    client: Client,
    root: PathBuf,
    segment: Segment,
    stop: CancellationToken,
) {
    scheduler.submit(async move {
        let policy = RetryPolicy::bounded(10);
        let checksum = segment.checksum;
        let url = segment.url;
        let path = segment.path.expect("path assigned by formatter before submission");

        let result: Result<(), _> = retry_with_backoff(&policy, &stop, |attempt| {
            let client = client.clone();
            let url = url.clone();
            let path = path.clone();
            let root = root.clone();
            let stop = stop.clone();
            async move {
                match download_to_file(&client, &url, &root, &path, &stop).await {
                    Ok((_, status)) if status.is_success() => RetryAction::Success(()),
                    Ok((_, status)) => {
                        tracing::warn!(%url, %status, attempt, "segment download rejected");
                        RetryAction::Retry(status.to_string())
                    }
                    Err(error) => {
                        tracing::warn!(%url, %error, attempt, "segment download failed");
                        RetryAction::Retry(error.to_string())
                    }
                }
            }
        })
        .await;

        DownloadOutcome { checksum, done: result.is_ok() }
    });
}

/// The projected path of the chunk that would open immediately after one
/// ending at `end`, mirroring [`Chunker`]'s own (fixed, unconfigured)
/// path template — used only to compute the notifier's `next_chunk` field.
fn projected_next_chunk_path(end: DateTime<Utc>) -> String {
    format!("{DEFAULT_CHUNK_DIRNAME}/{}", end.format(DEFAULT_CHUNK_PATH_TEMPLATE))
}

fn chunk_relative_url(feed_id: &str, chunk_path: &str) -> String {
    let without_ext = chunk_path.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(chunk_path);
    format!("{feed_id}/{without_ext}.m3u8")
}

fn notify_chunk_boundary(notifier: &mut Notifier, feed_id: &str, boundary: &ChunkBoundary) {
    let fields = json!({
        "chunk_relative_url": chunk_relative_url(feed_id, &boundary.path),
        "prev_chunk_relative_url": boundary.prev_path.as_deref().map(|p| chunk_relative_url(feed_id, p)),
        "next_chunk_relative_url": chunk_relative_url(feed_id, &projected_next_chunk_path(boundary.end)),
    });
    notifier.notify(fields);
}

/// Write `item` through the manifest tree, notifying on any chunk boundary
/// it closes, and — for a segment whose download was cancelled — append a
/// synthetic `PULL_ERROR` tag immediately after it (§7 `DownloadExhausted`:
/// "manifest records it with tag equivalent").
fn write_through(
    writer: &mut SegmentsListWriter,
    notifier: &mut Notifier,
    feed_id: &str,
    item: Item,
) -> std::io::Result<()> {
    let was_cancelled = matches!(item.as_segment(), Some(s) if s.status == SegmentStatus::Cancelled);

    let boundaries = writer.write(&item)?;
    for boundary in &boundaries {
        notify_chunk_boundary(notifier, feed_id, boundary);
    }

    if was_cancelled {
        let boundaries = writer.write(&Item::Tag(TagKind::PullError))?;
        for boundary in &boundaries {
            notify_chunk_boundary(notifier, feed_id, boundary);
        }
    }
    Ok(())
}

/// Resolve the startup merge against a persisted manifest tail (§4.4):
/// trim the freshly parsed playlist against the last written segment, and
/// either prepend a `PULL_DISCONTINUITY` (no overlap) or point the writer at
/// the correct hierarchical subtree to resume into (overlap found).
fn resolve_startup_merge(
    writer: &mut SegmentsListWriter,
    segments: VecDeque<Item>,
) -> Result<SegmentsList, ArchiverError> {
    let mut list = SegmentsList::from_items(segments);
    let Some(last_segment) = writer.last_segment() else {
        return Ok(list);
    };

    let removed = list.trimleft(&last_segment);
    let first_is_discontinuity = matches!(list.iter().next(), Some(Item::Tag(t)) if t.is_discontinuity());
    let persisted_tail_is_terminal_or_discontinuity = writer
        .last_tag_name()
        .and_then(|name| TagKind::from_name(&name))
        .is_some_and(TagKind::is_terminal_or_discontinuity);

    if removed == 0 && !first_is_discontinuity && !persisted_tail_is_terminal_or_discontinuity {
        let mut items: VecDeque<Item> = VecDeque::new();
        items.push_back(Item::Tag(TagKind::PullDiscontinuity));
        while let Some(item) = list.popleft() {
            items.push_back(item);
        }
        list = SegmentsList::from_items(items);
    } else {
        writer.resume_from(&last_segment).map_err(|_| {
            ArchiverError::Config("unable to resume hierarchical sub-manifests".to_string())
        })?;
    }

    Ok(list)
}

/// Run one feed's pull loop until its playlist completes (and `run_forever`
/// is false) or `stop` is cancelled. Owns and closes all of the feed's
/// manifests on the way out.
pub async fn run_feed(
    feed: FeedConfig,
    data_dir: PathBuf,
    parallel_downloads: usize,
    notifier_endpoint: url::Url,
    run_forever: bool,
    stop: CancellationToken,
) -> Result<(), ArchiverError> {
    let root = data_dir.join(&feed.id);
    std::fs::create_dir_all(&root)?;

    let client = Client::new();
    let base = base_url(feed.source_feed.as_str());

    let poll_policy = RetryPolicy::unbounded();
    let (body, _) = retry_with_backoff(&poll_policy, &stop, |attempt| {
        let client = client.clone();
        let url = feed.source_feed.to_string();
        let stop = stop.clone();
        async move {
            match fetch_playlist(&client, &url, &stop).await {
                Ok(ok) => RetryAction::Success(ok),
                Err(error) => {
                    tracing::warn!(feed = %feed.id, %error, attempt, "playlist fetch failed");
                    RetryAction::Retry(error)
                }
            }
        }
    })
    .await
    .map_err(|_| ArchiverError::ChangeDetectFailed)?;

    let mut index = hls_index::parse(&body, Some(&base)).map_err(ArchiverError::from)?;

    let formatter = Formatter { ext: feed.chunk_extension.clone(), ..Formatter::default() };
    let chunker = Chunker::new(&root, DEFAULT_MIN_CHUNK_DURATION);
    let mut writer = SegmentsListWriter::new(formatter.clone(), chunker, &root);
    let mut notifier = Notifier::new(notifier_endpoint, json!({ "id": feed.id }));
    let mut pending = PendingQueue::default();
    let mut scheduler: Scheduler<DownloadOutcome> = Scheduler::new(Some(parallel_downloads));

    let mut list = resolve_startup_merge(&mut writer, std::mem::take(&mut index.segments))?;

    let target_duration = index.target_duration.unwrap_or(6.0);

    if !index.complete && list.first_segment().is_some_and(|s| s.datetime.is_none()) {
        match detect_change(&client, feed.source_feed.as_str(), target_duration, &stop).await {
            Ok((new_body, end_datetime)) => {
                let new_index = hls_index::parse(&new_body, Some(&base))?;
                let old_items: VecDeque<Item> = list.iter().cloned().collect();
                let mut merged = SegmentsList::from_items(new_index.segments);
                merged.extendleft(old_items);
                merged.apply_end_datetime(end_datetime);
                list = merged;
                index.complete = new_index.complete;
            }
            Err(_) => {
                list.extend(VecDeque::new(), true);
            }
        }
    }

    let mut playlist_complete = index.complete;

    'outer: loop {
        drain_list_into_pending(&formatter, &root, &client, &stop, &mut list, &mut pending, &mut scheduler)?;

        loop {
            for item in pending.flush() {
                write_through(&mut writer, &mut notifier, &feed.id, item)?;
            }

            if scheduler.is_empty() && pending.is_empty() {
                break;
            }

            tokio::select! {
                _ = stop.cancelled() => break 'outer,
                outcome = scheduler.join_next(), if scheduler.is_running() => {
                    if let Some(Ok(outcome)) = outcome {
                        if outcome.done {
                            pending.done(outcome.checksum);
                        } else {
                            pending.cancel(outcome.checksum);
                        }
                    }
                }
                // Fallback heartbeat so a stalled, never-submitted pending
                // item (datetime missing, §7 MissingDatetime) still gets
                // re-checked against its deadline by the next flush().
                _ = tokio::time::sleep(Duration::from_secs(1)), if !scheduler.is_running() => {}
            }
        }

        if !run_forever && playlist_complete {
            break;
        }

        cancellable_sleep(Duration::from_secs_f64(target_duration / 2.0), &stop).await;
        if stop.is_cancelled() {
            break;
        }

        let poll_result = retry_with_backoff(&poll_policy, &stop, |attempt| {
            let client = client.clone();
            let url = feed.source_feed.to_string();
            let stop = stop.clone();
            async move {
                match fetch_playlist(&client, &url, &stop).await {
                    Ok(ok) => RetryAction::Success(ok),
                    Err(error) => {
                        tracing::warn!(feed = %feed.id, %error, attempt, "playlist poll failed");
                        RetryAction::Retry(error)
                    }
                }
            }
        })
        .await;

        let Ok((body, _)) = poll_result else { break };
        let new_index = match hls_index::parse(&body, Some(&base)) {
            Ok(index) => index,
            Err(error) if error.is_fatal_directive() => return Err(ArchiverError::from(error)),
            Err(error) => {
                tracing::warn!(feed = %feed.id, %error, "malformed playlist, retrying next tick");
                continue;
            }
        };

        // `list` is drained empty by `drain_list_into_pending` every
        // iteration, so the last known segment lives in `last_removed_segment`
        // rather than anywhere still in the list itself.
        let last_known_source_sequence = list
            .last_segment()
            .or(list.last_removed_segment.as_ref())
            .and_then(|s| s.source_sequence);
        let sequence_regressed = match (new_index.sequence, last_known_source_sequence) {
            (Some(new_seq), Some(last_seq)) => new_seq < last_seq,
            _ => false,
        };

        let merged = list.extend(new_index.segments.clone(), false);
        if sequence_regressed || !merged {
            if !list.tail_is_terminal_or_discontinuity() {
                list.push_back(Item::Tag(TagKind::SourceDiscontinuity));
            }
            match detect_change(&client, feed.source_feed.as_str(), target_duration, &stop).await {
                Ok((body, end_datetime)) => {
                    if let Ok(recovered) = hls_index::parse(&body, Some(&base)) {
                        list.extend(recovered.segments, true);
                        list.apply_end_datetime(end_datetime);
                    } else {
                        list.extend(new_index.segments, true);
                    }
                }
                Err(_) => {
                    list.extend(new_index.segments, true);
                }
            }
        }

        playlist_complete = new_index.complete;
    }

    scheduler.wait(Some(true)).await;
    for item in pending.flush() {
        write_through(&mut writer, &mut notifier, &feed.id, item)?;
    }
    notifier.wait().await;
    writer.close();

    Ok(())
}

fn drain_list_into_pending(
    formatter: &Formatter,
    root: &Path,
    client: &Client,
    stop: &CancellationToken,
    list: &mut SegmentsList,
    pending: &mut PendingQueue,
    scheduler: &mut Scheduler<DownloadOutcome>,
) -> Result<(), ArchiverError> {
    while let Some(item) = list.popleft() {
        match item {
            Item::Segment(mut segment) => {
                if segment.datetime.is_some() {
                    segment.path = Some(formatter.path(&segment)?);
                }
                let for_download = segment.clone();
                pending.promise(Item::Segment(segment));
                if for_download.path.is_some() {
                    submit_download(scheduler, client.clone(), root.to_path_buf(), for_download, stop.clone());
                }
            }
            tag => pending.promise(tag),
        }
    }
    Ok(())
}

trait IndexErrorExt {
    fn is_fatal_directive(&self) -> bool;
}

impl IndexErrorExt for hls_index::IndexError {
    fn is_fatal_directive(&self) -> bool {
        matches!(self, hls_index::IndexError::UnsupportedDirective(_))
    }
}
