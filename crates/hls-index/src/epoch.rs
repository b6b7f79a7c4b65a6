use regex::Regex;
use std::sync::LazyLock;

// Domain-specific heuristics for guessing a segment's wall-clock epoch from
// its URL, recovered from the original `guess_epoch_from_url` (BBC/DW feeds).
// Kept enabled by default; `Formatter::epoch_heuristics` can disable them
// per SPEC_FULL.md §13 (open question resolution 4).
static DW_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"dwstream.*segment(\d+)").expect("valid regex"));
static TRAILING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d+-(\d+)").expect("valid regex"));

/// Guess the epoch (UTC seconds) of a segment from its URL.
///
/// Returns 0 when neither heuristic matches.
pub fn guess_epoch_from_url(url: &str) -> u64 {
    if let Some(caps) = DW_SEGMENT.captures(url)
        && let Some(m) = caps.get(1)
        && let Ok(n) = m.as_str().parse::<u64>()
    {
        return n * 10;
    }
    if let Some(caps) = TRAILING_NUMBER.captures(url)
        && let Some(m) = caps.get(1)
        && let Ok(n) = m.as_str().parse::<u64>()
    {
        return n;
    }
    0
}
