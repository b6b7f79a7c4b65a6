use chrono::{DateTime, Utc};

use crate::attr::parse_attr_list;
use crate::crc32::crc32;
use crate::error::IndexError;
use crate::index::{Index, MediaDescriptor, StreamDescriptor};
use crate::segment::{Item, Segment};
use crate::tag::TagKind;

fn absolutise(raw_url: &str, base: Option<&str>) -> String {
    let joined = match base {
        Some(base) => match url::Url::parse(base).and_then(|b| b.join(raw_url)) {
            Ok(joined) => joined.to_string(),
            Err(_) => raw_url.to_string(),
        },
        None => raw_url.to_string(),
    };
    joined.replace(' ', "%20")
}

fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, IndexError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IndexError::Malformed(format!("invalid EXT-X-PROGRAM-DATE-TIME '{value}': {e}")))
}

/// Parse the body of an M3U8 playlist (§4.1).
///
/// `base` is the URL used to absolutise relative segment/stream references.
pub fn parse(body: &str, base: Option<&str>) -> Result<Index, IndexError> {
    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.is_empty() {
        return Err(IndexError::empty_file());
    }

    let mut cursor = 0usize;
    let head = lines[0].trim_start_matches(['#', ' ']);
    if head != "EXTM3U" {
        return Err(IndexError::Malformed(
            "unknown index format, EXTM3U signature not found".to_string(),
        ));
    }
    cursor += 1;

    let mut index = Index {
        base: base.map(str::to_string),
        ..Index::default()
    };

    let mut dt: Option<DateTime<Utc>> = None;
    let mut sequence: Option<u64> = None;
    let mut last_line: &str = lines[0];

    while cursor < lines.len() {
        let line = lines[cursor];
        cursor += 1;
        last_line = line;

        if !line.starts_with('#') {
            tracing::warn!(line, "unexpected line in playlist");
            index.unprocessed.push(line.to_string());
            continue;
        }

        let directive = line.trim_start_matches(['#', ' ']);
        let mut split = directive.splitn(2, ':');
        let key = split.next().unwrap_or_default();
        let value = split.next();

        macro_rules! pull_next_line {
            () => {{
                if cursor >= lines.len() {
                    return Err(IndexError::unexpected_eof(last_line));
                }
                let l = lines[cursor];
                cursor += 1;
                l
            }};
        }

        match key {
            "EXTINF" => {
                let value = value.unwrap_or_default();
                let mut parts = value.splitn(2, ',');
                let duration_str = parts.next().unwrap_or_default().trim();
                let duration: f64 = duration_str.parse().map_err(|_| {
                    IndexError::Malformed(format!("invalid EXTINF duration: {duration_str}"))
                })?;

                let raw_url = pull_next_line!();
                let checksum = crc32(raw_url.as_bytes());
                let url = absolutise(raw_url, base);

                index.segments.push_back(Item::Segment(Segment::new(
                    checksum,
                    url,
                    duration,
                    dt,
                    sequence,
                )));
                if let Some(s) = sequence.as_mut() {
                    *s += 1;
                }
                if let Some(d) = dt.as_mut() {
                    *d += chrono::Duration::milliseconds((duration * 1000.0).round() as i64);
                }
            }
            "EXT-X-STREAM-INF" => {
                let params = parse_attr_list(value.unwrap_or_default());
                let raw_url = pull_next_line!();
                index.streams.push(StreamDescriptor {
                    url: absolutise(raw_url, base),
                    params,
                    source: line.to_string(),
                });
            }
            "EXT-X-VERSION" => {
                if let Some(v) = value {
                    index.metadata.insert("EXT-X-VERSION".to_string(), v.to_string());
                }
            }
            "EXT-X-MEDIA-SEQUENCE" => {
                let v: u64 = value
                    .unwrap_or_default()
                    .parse()
                    .map_err(|_| IndexError::Malformed(format!("invalid EXT-X-MEDIA-SEQUENCE: {line}")))?;
                sequence = Some(v);
                index.sequence = Some(v);
            }
            "EXT-X-MEDIA" => {
                let params = parse_attr_list(value.unwrap_or_default());
                let uri = params.get("URI").cloned().unwrap_or_default();
                index.media.push(MediaDescriptor {
                    uri,
                    params,
                    source: line.to_string(),
                });
            }
            "EXT-X-TARGETDURATION" => {
                let v: f64 = value
                    .unwrap_or_default()
                    .parse()
                    .map_err(|_| IndexError::Malformed(format!("invalid EXT-X-TARGETDURATION: {line}")))?;
                index.target_duration = Some(v);
                index
                    .metadata
                    .insert("EXT-X-TARGETDURATION".to_string(), value.unwrap_or_default().to_string());
            }
            "EXT-X-ENDLIST" => {
                index.segments.push_back(Item::Tag(TagKind::SourceEnd));
                index.complete = true;
            }
            "EXT-X-PROGRAM-DATE-TIME" => {
                let parsed = parse_iso8601(value.unwrap_or_default())?;
                dt = Some(parsed);
                index.datetime = Some(parsed);
            }
            "EXT-X-DISCONTINUITY" => {
                index.segments.push_back(Item::Tag(TagKind::SourceDiscontinuity));
            }
            "EXT-X-I-FRAMES-ONLY" => {
                return Err(IndexError::UnsupportedDirective(
                    "I-Frame playlist not supported".to_string(),
                ));
            }
            "EXT-X-I-FRAME-STREAM-INF" => {
                return Err(IndexError::UnsupportedDirective(
                    "I-Frame stream info not supported".to_string(),
                ));
            }
            "EXT-X-MAP" => {
                return Err(IndexError::UnsupportedDirective(
                    "EXT-X-MAP not supported".to_string(),
                ));
            }
            "EXT-X-BYTERANGE" => {
                return Err(IndexError::UnsupportedDirective(
                    "byte-range segments not supported".to_string(),
                ));
            }
            "EXT-X-ALLOW-CACHE" => {}
            _ => {
                tracing::warn!(tag = line, "unexpected tag in playlist");
                index.unprocessed.push(line.to_string());
            }
        }
    }

    Ok(index)
}
