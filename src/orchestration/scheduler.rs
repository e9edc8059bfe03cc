//! # Delay Scheduler
//!
//! Runs jobs after a delay: retry backoff, deferred timeout checks and delayed
//! compensations. Jobs live in a `JoinSet` so shutdown can abort them.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{SagaError, SagaResult};

#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` once `delay` has elapsed
    pub fn schedule<F>(&self, delay: Duration, job: F) -> SagaResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(SagaError::Shutdown);
        }

        let mut jobs = self.jobs.lock();
        while jobs.try_join_next().is_some() {}
        jobs.spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        });
        Ok(())
    }

    /// Jobs not yet finished
    pub fn pending(&self) -> usize {
        let mut jobs = self.jobs.lock();
        while jobs.try_join_next().is_some() {}
        jobs.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new jobs, abort pending ones and wait up to `timeout` for them to unwind
    pub async fn shutdown(&self, timeout: Duration) {
        self.closed.store(true, Ordering::Release);

        let mut jobs = std::mem::take(&mut *self.jobs.lock());
        let pending = jobs.len();
        jobs.abort_all();

        let drained = tokio::time::timeout(timeout, async {
            while jobs.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => debug!(pending = pending, "Scheduler stopped"),
            Err(_) => warn!(
                remaining = jobs.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Scheduler jobs did not stop within the shutdown timeout"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_job_runs_after_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        scheduler
            .schedule(Duration::from_millis(20), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending_and_refuses_new_jobs() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        scheduler
            .schedule(Duration::from_secs(60), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        scheduler.shutdown(Duration::from_millis(200)).await;
        assert!(scheduler.is_closed());
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(matches!(
            scheduler.schedule(Duration::ZERO, async {}),
            Err(SagaError::Shutdown)
        ));
    }
}
