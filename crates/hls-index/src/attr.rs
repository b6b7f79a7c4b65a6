use std::collections::BTreeMap;

/// Split `string` on `splitchars`, except when inside a `"` quoted run.
///
/// Ports the source's `split_quoted`: HLS attribute lists (`EXT-X-STREAM-INF`,
/// `EXT-X-MEDIA`) are comma-separated but values may themselves contain commas
/// when double-quoted, e.g. `CODECS="avc1.4d401f,mp4a.40.2"`.
pub fn split_quoted(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut in_quotes = false;
    for (i, &b) in bytes.iter().enumerate() {
        let c = b as char;
        if in_quotes {
            if c == '"' {
                in_quotes = false;
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == ',' {
            parts.push(&s[start..i]);
            start = i + 1;
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Parse a `KEY=VALUE,KEY="quoted, value"` attribute list into a map,
/// stripping surrounding quotes from values.
pub fn parse_attr_list(s: &str) -> BTreeMap<String, String> {
    split_quoted(s)
        .into_iter()
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let mut split = part.splitn(2, '=');
            let key = split.next()?.trim();
            let value = split.next()?.trim();
            Some((key.to_string(), value.trim_matches('"').to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_unquoted_commas_only() {
        let parts = split_quoted(r#"BANDWIDTH=128000,CODECS="avc1.4d401f,mp4a.40.2""#);
        assert_eq!(parts, vec!["BANDWIDTH=128000", r#"CODECS="avc1.4d401f,mp4a.40.2""#]);
    }

    #[test]
    fn parses_attribute_list_stripping_quotes() {
        let map = parse_attr_list(r#"URI="audio.m3u8",GROUP-ID="aac",DEFAULT=YES"#);
        assert_eq!(map.get("URI").unwrap(), "audio.m3u8");
        assert_eq!(map.get("GROUP-ID").unwrap(), "aac");
        assert_eq!(map.get("DEFAULT").unwrap(), "YES");
    }
}
