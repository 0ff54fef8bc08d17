//! Bounded-concurrency fetch dispatcher.
//!
//! A semaphore with `concurrency_cap` permits bounds fetches across all
//! purposes. Permits are held only while the transport is working, never while
//! a callback runs, so callbacks are free to submit further fetches. The
//! scheduler applies no business logic to payloads.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::metrics::FetchMetrics;
use crate::network::FetchError;
use crate::transport::{Extraction, FetchPurpose, Transport};

pub type FetchOutcome = Result<Extraction, FetchError>;

pub struct FetchScheduler {
    transport: Arc<dyn Transport>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
    metrics: Arc<FetchMetrics>,
}

// Keeps the in-flight gauge honest when a fetch future is aborted
struct InFlight<'a>(&'a FetchMetrics);

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a FetchMetrics) -> Self {
        metrics.in_flight.inc();
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.dec();
    }
}

impl FetchScheduler {
    pub fn new(transport: Arc<dyn Transport>, concurrency_cap: usize, metrics: Arc<FetchMetrics>) -> Self {
        Self {
            transport,
            permits: Arc::new(Semaphore::new(concurrency_cap)),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Fetch one URL in the caller's task, waiting for a permit first.
    /// Returns `FetchError::Cancelled` once the scheduler is closed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn fetch(&self, url: &str, purpose: FetchPurpose) -> FetchOutcome {
        if self.is_closed() {
            return Err(FetchError::Cancelled);
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Cancelled)?;
        if self.is_closed() {
            return Err(FetchError::Cancelled);
        }

        self.metrics.record_dispatch(purpose);
        let result = {
            let _in_flight = InFlight::enter(&self.metrics);
            self.transport.fetch(url, purpose).await
        };

        if let Err(e) = &result {
            if *e != FetchError::Cancelled {
                self.metrics.failures.inc();
            }
            tracing::debug!(url, error = %e, "fetch failed");
        }
        result
    }

    /// Fetch `url` in a new task and hand the outcome to `on_done`.
    /// Submissions after `close` are dropped.
    pub fn submit<F, Fut>(self: &Arc<Self>, url: String, purpose: FetchPurpose, on_done: F) -> bool
    where
        F: FnOnce(FetchOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            tracing::debug!(%url, %purpose, "scheduler closed, submission dropped");
            return false;
        }
        let scheduler = Arc::clone(self);
        self.spawn(async move {
            let outcome = scheduler.fetch(&url, purpose).await;
            on_done(outcome).await;
        });
        true
    }

    /// Track a task so that draining or abandoning covers it
    pub fn spawn<Fut>(&self, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished
                && !e.is_cancelled()
            {
                tracing::error!("Task join error: {}", e);
            }
        }
        tasks.spawn(task);
    }

    pub fn in_flight_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Stop dispatching. Waiting and future fetches resolve to `Cancelled`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait for tracked tasks to finish, aborting whatever is left after `limit`.
    /// Returns true if everything finished in time.
    pub async fn drain(&self, limit: Duration) -> bool {
        let drained = tokio::time::timeout(limit, async {
            loop {
                let mut batch = std::mem::take(&mut *self.tasks.lock());
                if batch.is_empty() {
                    break;
                }
                while let Some(finished) = batch.join_next().await {
                    if let Err(e) = finished
                        && !e.is_cancelled()
                    {
                        tracing::error!("Task join error: {}", e);
                    }
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(limit_secs = limit.as_secs_f64(), "drain timed out, abandoning remaining tasks");
            self.abandon().await;
        }
        drained
    }

    /// Abort every tracked task and wait for the aborts to land
    pub async fn abandon(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                break;
            }
            batch.abort_all();
            while batch.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ScriptedTransport;
    use std::sync::atomic::AtomicUsize;

    fn transport(latency_ms: u64) -> Arc<ScriptedTransport> {
        let mut scripted = ScriptedTransport::new().with_latency(Duration::from_millis(latency_ms));
        for n in 0..6 {
            scripted.add_page(
                &format!("https://dex.test/{}", n),
                Extraction::new().with("name", format!("page {}", n)),
            );
        }
        Arc::new(scripted)
    }

    #[tokio::test]
    async fn test_cap_of_one_serializes_fetches() {
        let transport = transport(5);
        let metrics = Arc::new(FetchMetrics::new());
        let scheduler = Arc::new(FetchScheduler::new(transport.clone(), 1, Arc::clone(&metrics)));
        let done = Arc::new(AtomicUsize::new(0));

        for n in 0..6 {
            let done = Arc::clone(&done);
            scheduler.submit(format!("https://dex.test/{}", n), FetchPurpose::Detail, move |outcome| async move {
                assert!(outcome.is_ok());
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(scheduler.drain(Duration::from_secs(5)).await);

        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert_eq!(metrics.snapshot().peak_in_flight, 1);
        assert_eq!(transport.peak_concurrency(), 1);
        assert_eq!(metrics.snapshot().detail_fetches, 6);
    }

    #[tokio::test]
    async fn test_cap_bounds_parallelism() {
        let transport = transport(20);
        let metrics = Arc::new(FetchMetrics::new());
        let scheduler = Arc::new(FetchScheduler::new(transport.clone(), 3, Arc::clone(&metrics)));
        for n in 0..6 {
            scheduler.submit(format!("https://dex.test/{}", n), FetchPurpose::Detail, |_| async {});
        }
        assert!(scheduler.drain(Duration::from_secs(5)).await);
        assert!(transport.peak_concurrency() <= 3);
        assert_eq!(transport.fetch_count(), 6);
    }

    #[tokio::test]
    async fn test_closed_scheduler_cancels() {
        let scheduler = Arc::new(FetchScheduler::new(transport(0), 2, Arc::new(FetchMetrics::new())));
        scheduler.close();
        assert_eq!(
            scheduler.fetch("https://dex.test/0", FetchPurpose::Index).await,
            Err(FetchError::Cancelled)
        );
        assert!(!scheduler.submit("https://dex.test/1".to_string(), FetchPurpose::Detail, |_| async {}));
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let metrics = Arc::new(FetchMetrics::new());
        let scheduler = FetchScheduler::new(transport(0), 2, Arc::clone(&metrics));
        let outcome = scheduler.fetch("https://dex.test/missing", FetchPurpose::SubResource).await;
        assert_eq!(outcome, Err(FetchError::HttpStatus(404)));
        assert_eq!(metrics.snapshot().failures, 1);
        assert_eq!(metrics.snapshot().in_flight, 0);
    }

    #[tokio::test]
    async fn test_abandon_aborts_slow_tasks() {
        let transport = transport(10_000);
        let metrics = Arc::new(FetchMetrics::new());
        let scheduler = Arc::new(FetchScheduler::new(transport, 2, Arc::clone(&metrics)));
        let callback_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&callback_ran);
        scheduler.submit("https://dex.test/0".to_string(), FetchPurpose::Detail, move |_| async move {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.close();
        scheduler.abandon().await;
        assert_eq!(scheduler.in_flight_tasks(), 0);
        assert_eq!(metrics.snapshot().in_flight, 0);
        assert!(!callback_ran.load(Ordering::SeqCst));
    }
}
