//! Bounded-concurrency FIFO job scheduler (§4.5).
//!
//! Used with `max_count = parallel_downloads` for segment downloads and
//! `max_count = 1` for the chunk notifier, where strict send order matters.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::{JoinError, JoinHandle};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A bounded-concurrency pool of jobs with a FIFO overflow queue.
///
/// `submit` enqueues a job and starts it immediately if below `max_count`
/// running; otherwise it waits in `queued` until [`Scheduler::join_next`]
/// frees a slot. `max_count = None` means unbounded.
pub struct Scheduler<T: Send + 'static> {
    max_count: Option<usize>,
    queued: VecDeque<BoxFuture<T>>,
    running: FuturesUnordered<JoinHandle<T>>,
    stop: bool,
}

impl<T: Send + 'static> Default for Scheduler<T> {
    fn default() -> Self {
        Scheduler::new(None)
    }
}

impl<T: Send + 'static> Scheduler<T> {
    pub fn new(max_count: Option<usize>) -> Self {
        Scheduler {
            max_count,
            queued: VecDeque::new(),
            running: FuturesUnordered::new(),
            stop: false,
        }
    }

    /// Number of jobs currently running.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Number of jobs queued and not yet started.
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Running + queued — mirrors the source's `__len__`.
    pub fn len(&self) -> usize {
        self.running_count() + self.queued_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Any jobs currently running — mirrors the source's `__bool__`.
    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Enqueue a job, starting it immediately if a slot is free.
    pub fn submit<F>(&mut self, job: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.queued.push_back(Box::pin(job));
        self.drain();
    }

    fn drain(&mut self) {
        if self.stop {
            return;
        }
        while self.max_count.is_none_or(|max| self.running.len() < max) {
            let Some(job) = self.queued.pop_front() else {
                break;
            };
            self.running.push(tokio::spawn(job));
        }
    }

    /// Await the next completed job, refilling a slot from the queue
    /// afterward. Returns `None` once nothing is running or queued.
    pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
        let result = self.running.next().await?;
        self.drain();
        Some(result)
    }

    /// Optionally set `stop`, cancel every queued-but-not-yet-started job,
    /// and await all currently running jobs to completion.
    pub async fn wait(&mut self, stop: Option<bool>) {
        if let Some(stop) = stop {
            self.stop = stop;
        }
        if !self.queued.is_empty() {
            tracing::debug!(cancelled = self.queued.len(), "dropping queued jobs on wait");
            self.queued.clear();
        }
        while self.running.next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn respects_max_count_and_drains_queue() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut scheduler: Scheduler<()> = Scheduler::new(Some(2));

        for _ in 0..5 {
            let running = running.clone();
            let max_seen = max_seen.clone();
            scheduler.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        assert_eq!(scheduler.running_count(), 2);
        assert_eq!(scheduler.queued_count(), 3);

        while scheduler.join_next().await.is_some() {}
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn unbounded_starts_everything_immediately() {
        let mut scheduler: Scheduler<u32> = Scheduler::new(None);
        for i in 0..4 {
            scheduler.submit(async move { i });
        }
        assert_eq!(scheduler.queued_count(), 0);
        assert_eq!(scheduler.running_count(), 4);
    }

    #[tokio::test]
    async fn wait_cancels_queued_and_awaits_running() {
        let mut scheduler: Scheduler<()> = Scheduler::new(Some(1));
        scheduler.submit(async { tokio::time::sleep(Duration::from_millis(5)).await });
        scheduler.submit(async { panic!("queued job must never run") });
        assert_eq!(scheduler.queued_count(), 1);

        scheduler.wait(Some(true)).await;
        assert!(scheduler.is_empty());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn truthiness_reflects_running_jobs() {
        let mut scheduler: Scheduler<()> = Scheduler::new(None);
        assert!(!scheduler.is_running());
        scheduler.submit(async { tokio::time::sleep(Duration::from_millis(5)).await });
        assert!(scheduler.is_running());
        scheduler.join_next().await;
        assert!(!scheduler.is_running());
    }
}
