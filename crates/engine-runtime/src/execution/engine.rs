//! Bounded worker pool running inventory and incremental tasks.

use std::{future::Future, sync::Arc};
use tokio::{
    sync::Semaphore,
    task::JoinHandle,
};
use tracing::{Instrument, debug};

/// Runs submitted futures on the tokio runtime, at most `workers` at a time.
///
/// Completion is observed through the returned `JoinHandle`; the caller
/// awaits or selects on it.
#[derive(Debug, Clone)]
pub struct ExecuteEngine {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl ExecuteEngine {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of workers currently free.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn submit<F, T>(&self, name: impl Into<String>, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let name = name.into();
        tokio::spawn(
            async move {
                // The semaphore is never closed, so a failed acquire only means
                // the pool is gone; run without a permit in that case.
                let _permit = permits.acquire_owned().await.ok();
                debug!(task = %name, "Worker picked up task");
                future.await
            }
            .in_current_span(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test(start_paused = true)]
    async fn never_runs_more_than_the_worker_count() {
        let engine = ExecuteEngine::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                engine.submit(format!("task-{i}"), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(engine.idle_workers(), 2);
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(ExecuteEngine::new(0).workers(), 1);
    }
}
