//! Fire-and-forget HTTP notification of closed chunks (§4.7).
//!
//! Wraps a single-concurrency [`scheduler::Scheduler`] so notifications are
//! sent strictly in the order chunks closed, without blocking the pull loop
//! that produced them. A notification that exhausts its retries is logged
//! and dropped — nothing downstream depends on it arriving.

use std::time::Duration;

use scheduler::Scheduler;
use serde_json::Value;
use url::Url;

/// Retry a failed POST this many times before giving up on one notification.
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Delay between retry attempts.
const DEFAULT_RETRY_SLEEP: Duration = Duration::from_secs(30);

/// Posts a JSON body — `metadata` merged with whatever fields each call to
/// [`Notifier::notify`] supplies — to a configured endpoint.
pub struct Notifier {
    endpoint: Url,
    metadata: Value,
    client: reqwest::Client,
    scheduler: Scheduler<()>,
    retry_sleep: Duration,
    max_attempts: u32,
}

impl Notifier {
    pub fn new(endpoint: Url, metadata: Value) -> Self {
        Notifier {
            endpoint,
            metadata,
            client: reqwest::Client::new(),
            scheduler: Scheduler::new(Some(1)),
            retry_sleep: DEFAULT_RETRY_SLEEP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_retry_policy(mut self, retry_sleep: Duration, max_attempts: u32) -> Self {
        self.retry_sleep = retry_sleep;
        self.max_attempts = max_attempts;
        self
    }

    /// Queue a notification. `fields` is merged over `metadata` (its keys
    /// win on conflict) and sent as the POST body. Returns immediately —
    /// the send happens on the notifier's own single-slot scheduler.
    pub fn notify(&mut self, fields: Value) {
        let body = merge_objects(&self.metadata, &fields);
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let retry_sleep = self.retry_sleep;
        let max_attempts = self.max_attempts;
        self.scheduler
            .submit(async move { Notifier::send(client, endpoint, body, retry_sleep, max_attempts).await });
    }

    async fn send(client: reqwest::Client, endpoint: Url, body: Value, retry_sleep: Duration, max_attempts: u32) {
        for attempt in 1..=max_attempts {
            match client.post(endpoint.clone()).json(&body).send().await {
                Ok(response) if matches!(response.status().as_u16(), 200 | 201) => return,
                Ok(response) => {
                    tracing::warn!(status = %response.status(), attempt, %endpoint, "chunk notification rejected");
                }
                Err(error) => {
                    tracing::warn!(%error, attempt, %endpoint, "chunk notification request failed");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(retry_sleep).await;
            }
        }
        tracing::error!(%endpoint, max_attempts, "chunk notification exhausted retries, dropping");
    }

    /// Await every queued notification sent (or exhausted), dropping any
    /// still queued. Call during shutdown so in-flight sends aren't lost.
    pub async fn wait(&mut self) {
        self.scheduler.wait(Some(true)).await;
    }
}

fn merge_objects(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_keys_win_over_metadata() {
        let merged = merge_objects(&json!({"feed": "a", "path": "old.ts"}), &json!({"path": "new.ts"}));
        assert_eq!(merged, json!({"feed": "a", "path": "new.ts"}));
    }

    #[tokio::test]
    async fn notify_posts_merged_body_and_wait_drains_it() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        let received = std::sync::Arc::new(tokio::sync::Mutex::new(None));
        let received_clone = received.clone();

        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut stream = stream;
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                *received_clone.lock().await = Some(String::from_utf8_lossy(&buf[..n]).to_string());
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
            }
        });

        let endpoint = Url::parse(&format!("http://{server_addr}/chunks")).unwrap();
        let mut notifier = Notifier::new(endpoint, json!({"feed": "demo"}));
        notifier.notify(json!({"path": "chunks/a.yaml"}));
        notifier.wait().await;

        let body = received.lock().await.clone().unwrap();
        assert!(body.contains("demo"));
        assert!(body.contains("chunks/a.yaml"));
    }
}
