//! YAML configuration loading (§6, §12).
//!
//! The pipeline itself treats configuration loading as an out-of-scope
//! collaborator (§2); this module is the concrete edge that satisfies that
//! collaborator's contract for a standalone binary.

use std::collections::HashSet;
use std::path::Path;

use md5::{Digest, Md5};
use serde::Deserialize;
use url::Url;

use crate::error::ArchiverError;

fn default_parallel_downloads() -> usize {
    4
}

fn default_chunk_extension() -> String {
    "ts".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFeed {
    Url(String),
    Detailed {
        source_feed: String,
        id: Option<String>,
        #[serde(default)]
        chunk_extension: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_parallel_downloads")]
    parallel_downloads: usize,
    #[serde(default = "default_chunk_extension")]
    chunk_extension: String,
    #[serde(default)]
    active_feeds: Option<Vec<String>>,
    feeds: Vec<RawFeed>,
    chunk_metadata_endpoint: Url,
}

/// One configured upstream playlist, fully resolved (defaulted `id`, per-feed
/// `chunk_extension` falling back to the top-level default).
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub id: String,
    pub source_feed: Url,
    pub chunk_extension: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub parallel_downloads: usize,
    pub chunk_metadata_endpoint: Url,
    pub feeds: Vec<FeedConfig>,
}

/// `md5(source_feed_url)` hex, the default `id` for a feed that doesn't name
/// one explicitly (§12, mirroring `chunker.py`).
fn default_feed_id(source_feed: &str) -> String {
    let digest = Md5::digest(source_feed.as_bytes());
    hex::encode(digest)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ArchiverError> {
        let raw = std::fs::read_to_string(path)?;
        let raw: RawConfig = serde_yaml::from_str(&raw)
            .map_err(|e| ArchiverError::Config(format!("parsing {}: {e}", path.display())))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ArchiverError> {
        let mut feeds = Vec::with_capacity(raw.feeds.len());
        let mut seen_ids: HashSet<String> = HashSet::new();

        for feed in raw.feeds {
            let (source_feed, id, chunk_extension) = match feed {
                RawFeed::Url(url) => (url, None, None),
                RawFeed::Detailed { source_feed, id, chunk_extension } => (source_feed, id, chunk_extension),
            };
            let source_feed = Url::parse(&source_feed)
                .map_err(|e| ArchiverError::Config(format!("invalid feed url {source_feed}: {e}")))?;
            let id = id.unwrap_or_else(|| default_feed_id(source_feed.as_str()));

            if !seen_ids.insert(id.clone()) {
                tracing::warn!(%id, "duplicated feed id, later entry is ignored");
                continue;
            }

            feeds.push(FeedConfig {
                id,
                source_feed,
                chunk_extension: chunk_extension.unwrap_or_else(|| raw.chunk_extension.clone()),
            });
        }

        // Feed activation filter (§12): parsed for validation above, but
        // only launched if present in `active_feeds` (absence of the key
        // means every configured feed is active).
        if let Some(active) = &raw.active_feeds {
            let active: HashSet<&str> = active.iter().map(String::as_str).collect();
            feeds.retain(|feed| active.contains(feed.id.as_str()));
        }

        if feeds.is_empty() {
            return Err(ArchiverError::Config("no active feeds configured".to_string()));
        }

        Ok(Config {
            parallel_downloads: raw.parallel_downloads,
            chunk_metadata_endpoint: raw.chunk_metadata_endpoint,
            feeds,
        })
    }
}
