/// A control marker occupying a position in the ordered segment/tag stream (§3).
///
/// Tags carry no data of their own; identity is by kind alone, so two tags of
/// the same kind always compare equal regardless of when they were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    /// Upstream signalled a discontinuity, or our merge against a fresh
    /// playlist window failed to find an overlap.
    SourceDiscontinuity,
    /// Our poller lost continuity: the persisted tail doesn't overlap a
    /// freshly fetched playlist.
    PullDiscontinuity,
    /// A download exhausted its retries.
    PullError,
    /// Upstream sent `EXT-X-ENDLIST`.
    SourceEnd,
    /// Internal boundary marker emitted when the sub-list directory rolls.
    ChunkEnd,
}

impl TagKind {
    /// Stable name used as the bare-string serialisation in manifests.
    pub const fn name(self) -> &'static str {
        match self {
            TagKind::SourceDiscontinuity => "SOURCE-DISCONTINUITY",
            TagKind::PullDiscontinuity => "PULL-DISCONTINUITY",
            TagKind::PullError => "PULL-ERROR",
            TagKind::SourceEnd => "SOURCE-END",
            TagKind::ChunkEnd => "CHUNK-END",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SOURCE-DISCONTINUITY" => Some(TagKind::SourceDiscontinuity),
            "PULL-DISCONTINUITY" => Some(TagKind::PullDiscontinuity),
            "PULL-ERROR" => Some(TagKind::PullError),
            "SOURCE-END" => Some(TagKind::SourceEnd),
            "CHUNK-END" => Some(TagKind::ChunkEnd),
            _ => None,
        }
    }

    /// `*_END` or `*DISCONTINUITY` — a terminal/break marker after which a
    /// chunk or continuity run must close (§4.6 Chunker, §4.4 merge).
    pub fn is_terminal_or_discontinuity(self) -> bool {
        matches!(
            self,
            TagKind::SourceEnd | TagKind::SourceDiscontinuity | TagKind::PullDiscontinuity
        )
    }

    pub fn is_discontinuity(self) -> bool {
        matches!(
            self,
            TagKind::SourceDiscontinuity | TagKind::PullDiscontinuity | TagKind::PullError
        )
    }
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
