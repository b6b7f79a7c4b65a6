use thiserror::Error;

/// Errors raised while parsing an M3U8 playlist body.
///
/// Mirrors the two failure modes the original Python parser raised as a single
/// `HLSIndexException`: a structurally broken playlist (`Malformed`) and a
/// recognised-but-unsupported directive (`UnsupportedDirective`), which callers
/// are expected to treat very differently (§7: the former retries on the next
/// poll, the latter is fatal for the feed).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("malformed index: {0}")]
    Malformed(String),

    #[error("unsupported directive: {0}")]
    UnsupportedDirective(String),
}

impl IndexError {
    pub fn empty_file() -> Self {
        IndexError::Malformed("empty file".to_string())
    }

    pub fn unexpected_eof(last_line: impl AsRef<str>) -> Self {
        IndexError::Malformed(format!(
            "unexpected end of file, last line was: {}",
            last_line.as_ref()
        ))
    }
}
