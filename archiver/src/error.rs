//! Archiver-wide error type (§7).
//!
//! Each library crate keeps its own typed errors; this is the seam where
//! they get folded into one enum the pull loop and supervisor can match on
//! to decide between "retry this poll" and "this feed is dead".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("playlist parse error: {0}")]
    Index(#[from] hls_index::IndexError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("no content change observed while detecting wall-clock offset")]
    ChangeDetectFailed,
}

impl ArchiverError {
    /// Whether this error should end the feed's pull loop entirely, as
    /// opposed to being logged and retried on the next tick (§7):
    /// `UnsupportedDirective` is a configuration problem, everything else
    /// (malformed playlists, network errors) is transient.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArchiverError::Index(hls_index::IndexError::UnsupportedDirective(_)))
    }
}
