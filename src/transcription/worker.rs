//! # Worker Context
//!
//! Hands blocking work (engine load/build, WAV packaging, inference) to
//! tokio's blocking pool so connection tasks never stall the event loop.
//! A semaphore caps how many of those jobs run at once.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerContext {
    permits: Arc<Semaphore>,
    max_jobs: usize,
}

impl WorkerContext {
    /// Allow at most `max_jobs` blocking jobs at a time (minimum 1).
    pub fn new(max_jobs: usize) -> Self {
        let max_jobs = max_jobs.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
        }
    }

    /// Run `job` on the blocking pool and wait for its result.
    ///
    /// ## Behavior:
    /// - Waits for a free permit first; the permit is held until the job returns
    /// - A panic inside the job comes back as an error, not a crashed task
    /// - `label` only appears in logs and error messages
    pub async fn run<T, F>(&self, label: &'static str, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("worker context is closed"))?;

        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| anyhow!("{} job did not complete: {}", label, e))?;

        tracing::debug!(
            job = label,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Worker job finished"
        );
        result
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_job_result() {
        let worker = WorkerContext::new(1);
        let value = worker.run("add", || Ok(2 + 2)).await.unwrap();
        assert_eq!(value, 4);

        let err = worker
            .run("fail", || -> Result<()> { Err(anyhow!("boom")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(worker.available(), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let worker = WorkerContext::new(1);
        let err = worker
            .run("panics", || -> Result<()> { panic!("bad job") })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panics job did not complete"));
        assert_eq!(worker.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_permits_bound_concurrency() {
        let worker = WorkerContext::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let worker = worker.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                worker
                    .run("sleep", move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(worker.max_jobs(), 2);
    }

    #[test]
    fn test_zero_permits_clamped() {
        assert_eq!(WorkerContext::new(0).max_jobs(), 1);
    }
}
