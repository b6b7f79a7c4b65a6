//! Segment and playlist downloads (§4.4, §4.8, §4.9).
//!
//! `fetch_playlist` and `download_to_file` are the two HTTP shapes the pull
//! loop needs: a buffered GET for a playlist body, and a streamed GET that
//! writes straight to disk with idempotent skip-on-match. Both are wrapped
//! in [`crate::retry::retry_with_backoff`] by their callers in `pull.rs`.

use std::path::Path;

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::ArchiverError;

/// GET `url`, returning the response body and the `Date` response header
/// (used by `detect_change` for wall-clock recovery, §4.4).
pub async fn fetch_playlist(
    client: &Client,
    url: &str,
    stop: &CancellationToken,
) -> Result<(String, Option<String>), ArchiverError> {
    let response = tokio::select! {
        _ = stop.cancelled() => return Err(ArchiverError::Config("cancelled".to_string())),
        result = client.get(url).send() => result?,
    };
    if response.status() != StatusCode::OK {
        return Err(ArchiverError::Request(
            response.error_for_status().unwrap_err(),
        ));
    }
    let date = response
        .headers()
        .get(reqwest::header::DATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await?;
    Ok((body, date))
}

/// Download `url` to `<root>/<relative_path>` (§4.8).
///
/// Skips the write entirely when a file already exists at the target whose
/// size matches the response's `Content-Length` — the idempotent-resume
/// path exercised by scenario 3 (§8) on restart against an overlapping
/// playlist window. Returns the response headers and status unconditionally
/// so callers can log non-200s.
pub async fn download_to_file(
    client: &Client,
    url: &str,
    root: &Path,
    relative_path: &str,
    stop: &CancellationToken,
) -> Result<(HeaderMap, StatusCode), ArchiverError> {
    let response = tokio::select! {
        _ = stop.cancelled() => return Err(ArchiverError::Config("cancelled".to_string())),
        result = client.get(url).send() => result?,
    };
    let status = response.status();
    let headers = response.headers().clone();
    if status != StatusCode::OK {
        return Ok((headers, status));
    }

    let full_path = root.join(relative_path);
    let content_length = headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let (Some(expected), Ok(metadata)) = (content_length, tokio::fs::metadata(&full_path).await)
        && metadata.len() == expected
    {
        tracing::debug!(path = %full_path.display(), "segment already present, skipping download");
        return Ok((headers, status));
    }

    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = tokio::select! {
        _ = stop.cancelled() => return Err(ArchiverError::Config("cancelled".to_string())),
        result = response.bytes() => result?,
    };
    tokio::fs::write(&full_path, &bytes).await?;
    Ok((headers, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn serve_once(body: &'static str, extra_headers: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n{}",
                    body.len(),
                    extra_headers,
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn fetch_playlist_returns_body_and_date() {
        let addr = serve_once("#EXTM3U\n", "Date: Mon, 01 Jan 2023 00:00:00 GMT\r\n").await;
        let client = Client::new();
        let stop = CancellationToken::new();
        let (body, date) = fetch_playlist(&client, &format!("http://{addr}/live.m3u8"), &stop)
            .await
            .unwrap();
        assert_eq!(body, "#EXTM3U\n");
        assert_eq!(date.as_deref(), Some("Mon, 01 Jan 2023 00:00:00 GMT"));
    }

    #[tokio::test]
    async fn download_to_file_writes_bytes() {
        let addr = serve_once("segment-bytes", "").await;
        let client = Client::new();
        let stop = CancellationToken::new();
        let dir = tempfile::tempdir().unwrap();
        let (_, status) = download_to_file(&client, &format!("http://{addr}/a.ts"), dir.path(), "a.ts", &stop)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        let written = std::fs::read_to_string(dir.path().join("a.ts")).unwrap();
        assert_eq!(written, "segment-bytes");
    }

    #[tokio::test]
    async fn download_to_file_skips_when_size_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "segment-bytes").unwrap();
        let addr = serve_once("segment-bytes", "").await;
        let client = Client::new();
        let stop = CancellationToken::new();
        let (_, status) = download_to_file(&client, &format!("http://{addr}/a.ts"), dir.path(), "a.ts", &stop)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
    }
}
