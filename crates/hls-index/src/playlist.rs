use crate::segment::Segment;

/// Render captured chunk segments back into a minimal M3U8 playlist.
///
/// Ported from the source's `segments_to_index`: used by the playlist-service
/// collaborator (§6) to re-serve a chunk as HLS, always marked complete since
/// a chunk is by definition a closed, bounded span of segments.
pub fn segments_to_playlist(segments: &[Segment], base_url: &str) -> Option<String> {
    let first = segments.first()?;
    let target_duration = segments
        .iter()
        .map(|s| s.duration)
        .fold(0.0_f64, f64::max)
        .ceil() as u64;

    let mut lines = vec![
        "#EXTM3U".to_string(),
        "#EXT-X-VERSION:3".to_string(),
        format!("#EXT-X-TARGETDURATION:{target_duration}"),
        format!("#EXT-X-MEDIA-SEQUENCE:{}", first.sequence),
    ];

    for segment in segments {
        lines.push(format!("#EXTINF:{},", format_duration(segment.duration)));
        let url = match segment.path.as_deref() {
            Some(path) => join_url(base_url, path),
            None => join_url(base_url, &segment.url),
        };
        lines.push(url);
    }
    lines.push("#EXT-X-ENDLIST".to_string());

    Some(lines.join("\n"))
}

fn format_duration(duration: f64) -> String {
    // Matches Python's `%g`: shortest representation that round-trips.
    let mut s = format!("{duration}");
    if s.ends_with(".0") {
        s.truncate(s.len() - 2);
    }
    s
}

fn join_url(base: &str, relative: &str) -> String {
    if base.is_empty() {
        return relative.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(relative)) {
        Ok(joined) => joined.to_string(),
        Err(_) => relative.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn segment(sequence: u64, path: &str, duration: f64) -> Segment {
        let mut s = Segment::new(
            1,
            "https://example.com/seg.ts".to_string(),
            duration,
            Some("2023-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()),
            Some(0),
        );
        s.sequence = sequence;
        s.path = Some(path.to_string());
        s
    }

    #[test]
    fn renders_minimal_playlist() {
        let segments = vec![segment(0, "a.ts", 6.0), segment(1, "b.ts", 6.0)];
        let playlist = segments_to_playlist(&segments, "https://cdn.example/chunks/").unwrap();
        assert!(playlist.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n"));
        assert!(playlist.contains("https://cdn.example/chunks/a.ts"));
        assert!(playlist.ends_with("#EXT-X-ENDLIST"));
    }

    #[test]
    fn empty_segments_yields_none() {
        assert!(segments_to_playlist(&[], "https://cdn.example/").is_none());
    }
}
