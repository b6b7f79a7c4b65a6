//! Shared exponential-backoff retry helper (§4.4, §4.8, §7).
//!
//! One shape covers both retry policies the spec calls for: playlist polls
//! (`max_attempts: None`, unbounded) and segment downloads (`max_attempts:
//! Some(10)`), both doubling from a 5s base up to a 60s cap. The notifier
//! crate implements its own flat-interval retry independently (§4.7) since
//! its shape (30s, no doubling) doesn't fit this one.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 5s doubling to a 60s cap, as specified for both poll and segment retries.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// `None` means retry forever (the playlist-poll policy, §4.4).
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        RetryPolicy {
            max_attempts: None,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: Some(max_attempts),
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn attempt_allowed(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// What the caller's operation decided about its own result.
pub enum RetryAction<T, E> {
    Success(T),
    /// Transient; retry after the backoff delay if attempts remain.
    Retry(E),
    /// Permanent; stop retrying immediately.
    Fail(E),
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("cancelled")]
    Cancelled,
    #[error("retries exhausted: {0}")]
    Exhausted(E),
    #[error("{0}")]
    Fatal(E),
}

/// Run `operation` under `policy`, sleeping (cancellably) between attempts.
///
/// `operation` receives the 0-indexed attempt number. Aborts immediately if
/// `stop` is cancelled, including mid-sleep (§4.4, §5).
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    stop: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        if stop.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(RetryError::Fatal(err)),
            RetryAction::Retry(err) => {
                if !policy.attempt_allowed(attempt + 1) {
                    return Err(RetryError::Exhausted(err));
                }
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                tokio::select! {
                    _ = stop.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// A `sleep` that returns early if `stop` is cancelled (§4.4, §9).
pub async fn cancellable_sleep(duration: Duration, stop: &CancellationToken) {
    tokio::select! {
        _ = stop.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::unbounded();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::bounded(3);
        let stop = CancellationToken::new();
        let result: Result<u32, RetryError<&str>> =
            retry_with_backoff(&policy, &stop, |_| async { RetryAction::Success(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn exhausts_bounded_attempts() {
        let policy = RetryPolicy {
            max_attempts: Some(2),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let stop = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = retry_with_backoff(&policy, &stop, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { RetryAction::Retry("boom") }
        })
        .await;
        assert!(matches!(result, Err(RetryError::Exhausted("boom"))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fail_action_stops_immediately() {
        let policy = RetryPolicy::bounded(5);
        let stop = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = retry_with_backoff(&policy, &stop, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { RetryAction::Fail("unsupported") }
        })
        .await;
        assert!(matches!(result, Err(RetryError::Fatal("unsupported"))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_retry_loop() {
        let policy = RetryPolicy::unbounded();
        let stop = CancellationToken::new();
        stop.cancel();
        let result: Result<(), RetryError<&str>> =
            retry_with_backoff(&policy, &stop, |_| async { RetryAction::Retry("down") }).await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
