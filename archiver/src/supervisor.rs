//! The per-process, multi-feed supervisor (§2, §9 "Global process-wide state").
//!
//! `spec.md` treats the *multi-process* supervisor — one OS process per feed
//! — as an out-of-scope external collaborator and only specifies its
//! interface: a shared `stop` signal threaded into each pipeline, and feed
//! isolation (no shared mutable state). This binary runs every active feed
//! as its own `tokio` task instead of its own process — the isolation
//! `spec.md` requires (separate `SegmentsList`, manifests, scheduler per
//! feed) holds either way, and a single process is what a checked-in binary
//! crate can actually be.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::pull::run_feed;

/// Run every active feed to completion (or until `stop` is cancelled),
/// logging but not propagating a single feed's fatal error — one
/// misconfigured feed must never take down the others (§5 "Feeds are
/// isolated... no shared mutable state across feeds").
pub async fn run(config: Config, data_dir: PathBuf, run_forever: bool, stop: CancellationToken) {
    let mut handles = Vec::with_capacity(config.feeds.len());

    for feed in config.feeds {
        let data_dir = data_dir.clone();
        let endpoint = config.chunk_metadata_endpoint.clone();
        let parallel_downloads = config.parallel_downloads;
        let stop = stop.clone();
        let feed_id = feed.id.clone();

        handles.push((
            feed_id,
            tokio::spawn(async move {
                run_feed(feed, data_dir, parallel_downloads, endpoint, run_forever, stop).await
            }),
        ));
    }

    for (feed_id, handle) in handles {
        match handle.await {
            Ok(Ok(())) => tracing::info!(feed = %feed_id, "feed pipeline exited"),
            Ok(Err(error)) => tracing::error!(feed = %feed_id, %error, "feed pipeline failed"),
            Err(join_error) => tracing::error!(feed = %feed_id, %join_error, "feed task panicked"),
        }
    }
}
