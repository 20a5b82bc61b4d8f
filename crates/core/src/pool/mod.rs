//! Semaphore-gated worker pool.
//!
//! Runs one task per item with at most `limit` tasks in flight. Results come
//! back in input order regardless of completion order. A failing or
//! panicking task never cancels its siblings; cancellation of the run only
//! stops tasks that have not acquired a permit yet.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::context::RunContext;

/// Error type for pool construction.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker limit must be at least 1")]
    ZeroLimit,
}

/// Result of one item's task.
#[derive(Debug)]
pub enum TaskOutcome<I, T> {
    /// The task ran to completion.
    Completed(T),
    /// Never started because the run was cancelled.
    Skipped(I),
    /// The task panicked.
    Failed { item: I, message: String },
}

impl<I, T> TaskOutcome<I, T> {
    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

/// Tracks statistics for a pool.
#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    peak_active: AtomicU64,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
}

/// Snapshot of pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub active_tasks: usize,
    pub peak_active: usize,
    pub max_concurrent: usize,
    pub total_processed: u64,
    pub total_failed: u64,
}

/// Bounded-concurrency scheduler.
pub struct WorkerPool {
    name: String,
    limit: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Creates a pool allowing `limit` concurrent tasks.
    pub fn new(name: impl Into<String>, limit: usize) -> Result<Self, PoolError> {
        if limit == 0 {
            return Err(PoolError::ZeroLimit);
        }
        Ok(Self {
            name: name.into(),
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            stats: Arc::new(PoolStats::default()),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            name: self.name.clone(),
            active_tasks: self.stats.active.load(Ordering::Relaxed) as usize,
            peak_active: self.stats.peak_active.load(Ordering::Relaxed) as usize,
            max_concurrent: self.limit,
            total_processed: self.stats.total_processed.load(Ordering::Relaxed),
            total_failed: self.stats.total_failed.load(Ordering::Relaxed),
        }
    }

    /// Runs `task` once per item and returns one outcome per item, in input
    /// order.
    pub async fn run<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        ctx: &RunContext,
        task: F,
    ) -> Vec<TaskOutcome<I, T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let task = Arc::new(task);
        let mut handles = Vec::with_capacity(items.len());

        debug!(pool = %self.name, items = items.len(), limit = self.limit, "Starting pool run");

        for item in items {
            let fallback = item.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let stats = Arc::clone(&self.stats);
            let cancel = ctx.cancel_token().clone();
            let task = Arc::clone(&task);

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return TaskOutcome::Skipped(item);
                };
                // A permit may win the race against a cancel that already fired.
                if cancel.is_cancelled() {
                    return TaskOutcome::Skipped(item);
                }

                let active = stats.active.fetch_add(1, Ordering::Relaxed) + 1;
                stats.peak_active.fetch_max(active, Ordering::Relaxed);
                let value = task(item).await;
                stats.active.fetch_sub(1, Ordering::Relaxed);
                stats.total_processed.fetch_add(1, Ordering::Relaxed);
                TaskOutcome::Completed(value)
            });
            handles.push((fallback, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (fallback, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // The active counter of a panicked task is not decremented.
                    self.stats.active.fetch_sub(1, Ordering::Relaxed);
                    self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
                    error!(pool = %self.name, error = %e, "Pool task panicked");
                    outcomes.push(TaskOutcome::Failed {
                        item: fallback,
                        message: e.to_string(),
                    });
                }
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_limit_rejected() {
        assert_eq!(WorkerPool::new("test", 0).err(), Some(PoolError::ZeroLimit));
        assert_eq!(WorkerPool::new("test", 3).unwrap().limit(), 3);
    }

    #[tokio::test]
    async fn test_results_in_input_order() {
        let pool = WorkerPool::new("test", 3).unwrap();
        let ctx = RunContext::new();
        // Later items finish first.
        let outcomes = pool
            .run((0..6u64).collect(), &ctx, |n| async move {
                tokio::time::sleep(Duration::from_millis(30 - n * 5)).await;
                n * 10
            })
            .await;

        let values: Vec<u64> = outcomes.into_iter().filter_map(TaskOutcome::completed).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let ctx = RunContext::new();
        let outcomes = pool
            .run((0..8).collect::<Vec<u32>>(), &ctx, |_| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
            .await;

        assert_eq!(outcomes.len(), 8);
        let status = pool.status();
        assert!(status.peak_active <= 2, "peak was {}", status.peak_active);
        assert_eq!(status.total_processed, 8);
        assert_eq!(status.active_tasks, 0);
    }

    #[tokio::test]
    async fn test_limit_larger_than_items() {
        let pool = WorkerPool::new("test", 50).unwrap();
        let ctx = RunContext::new();
        let outcomes = pool.run(vec!["a", "b"], &ctx, |s| async move { s.len() }).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(TaskOutcome::is_completed));
    }

    #[tokio::test]
    async fn test_panic_isolated_to_one_item() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let ctx = RunContext::new();
        let outcomes = pool
            .run(vec![1, 2, 3], &ctx, |n| async move {
                if n == 2 {
                    panic!("boom");
                }
                n
            })
            .await;

        assert!(matches!(outcomes[0], TaskOutcome::Completed(1)));
        assert!(matches!(outcomes[1], TaskOutcome::Failed { item: 2, .. }));
        assert!(matches!(outcomes[2], TaskOutcome::Completed(3)));
        assert_eq!(pool.status().total_failed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_unstarted_items() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let ctx = RunContext::new();
        ctx.cancel();
        let outcomes = pool.run(vec![1, 2, 3], &ctx, |n| async move { n }).await;
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, TaskOutcome::Skipped(_))));
    }
}
