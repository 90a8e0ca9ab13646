//! Bounded worker pool
//!
//! Runs a batch with at most `K` items in flight and hands every result to a
//! [`ResultHandler`] as soon as it is available.

use std::any::Any;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Concurrency limit below 1
    #[error("concurrency limit must be at least 1, got {0}")]
    InvalidLimit(usize),
}

/// A work unit that did not produce an output
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerFault {
    /// The work future panicked
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// The worker task was cancelled before finishing
    #[error("worker was cancelled")]
    Cancelled,
}

impl WorkerFault {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Result of one item, tagged with its position in the input
#[derive(Debug)]
pub struct PoolResult<O> {
    pub index: usize,
    pub outcome: Result<O, WorkerFault>,
}

/// Receives pool results one at a time, in completion order
///
/// Calls never overlap: the next result is delivered only after the previous
/// `on_result` returned.
#[async_trait]
pub trait ResultHandler<O: Send + 'static>: Send {
    async fn on_result(&mut self, result: PoolResult<O>);
}

/// Bounded worker pool
///
/// # Example
///
/// ```ignore
/// let pool = BoundedWorkerPool::new(4)?;
/// pool.run(items, |item| async move { work(item).await }, &mut handler).await;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BoundedWorkerPool {
    limit: usize,
}

impl BoundedWorkerPool {
    /// Create a pool allowing `limit` items in flight
    pub fn new(limit: usize) -> Result<Self, PoolError> {
        if limit == 0 {
            return Err(PoolError::InvalidLimit(limit));
        }
        Ok(Self { limit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `work` over every item and feed each result to `handler`
    ///
    /// Returns once the handler has been called exactly once per item. A
    /// failing or panicking item never stops its siblings.
    pub async fn run<I, O, F, Fut, H>(&self, items: Vec<I>, work: F, handler: &mut H) -> usize
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        H: ResultHandler<O> + ?Sized,
    {
        let total = items.len();
        let permits = Arc::new(Semaphore::new(self.limit));
        let work = Arc::new(work);
        let mut workers = JoinSet::new();
        let mut pending: BTreeSet<usize> = (0..total).collect();

        debug!(total, limit = self.limit, "Starting pool run");

        for (index, item) in items.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let work = Arc::clone(&work);
            workers.spawn(async move {
                // The semaphore is never closed while the run is alive
                let _permit = permits.acquire_owned().await.ok();
                let outcome = AssertUnwindSafe(async move { work(item).await })
                    .catch_unwind()
                    .await
                    .map_err(WorkerFault::from_panic);
                (index, outcome)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    pending.remove(&index);
                    if let Err(fault) = &outcome {
                        warn!(index, error = %fault, "Worker fault");
                    }
                    handler.on_result(PoolResult { index, outcome }).await;
                    delivered += 1;
                }
                Err(e) => {
                    // Panics are caught inside the worker, so this is a cancellation
                    warn!(error = %e, "Worker task did not complete");
                }
            }
        }

        // Every item gets its callback even if its worker never reported back
        for index in pending {
            handler
                .on_result(PoolResult {
                    index,
                    outcome: Err(WorkerFault::Cancelled),
                })
                .await;
            delivered += 1;
        }

        debug!(total, delivered, "Pool run finished");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Collector {
        order: Vec<usize>,
        values: Vec<Result<u32, WorkerFault>>,
    }

    #[async_trait]
    impl ResultHandler<u32> for Collector {
        async fn on_result(&mut self, result: PoolResult<u32>) {
            self.order.push(result.index);
            self.values.push(result.outcome);
        }
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert_eq!(
            BoundedWorkerPool::new(0).unwrap_err(),
            PoolError::InvalidLimit(0)
        );
        assert_eq!(BoundedWorkerPool::new(3).unwrap().limit(), 3);
    }

    #[tokio::test]
    async fn test_every_item_delivered_once() {
        let pool = BoundedWorkerPool::new(3).unwrap();
        let mut collector = Collector::default();

        let delivered = pool
            .run((0..10u32).collect(), |n| async move { n * 2 }, &mut collector)
            .await;

        assert_eq!(delivered, 10);
        let mut order = collector.order.clone();
        order.sort_unstable();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_in_completion_order() {
        let pool = BoundedWorkerPool::new(3).unwrap();
        let mut collector = Collector::default();

        // Item 0 is slowest, item 2 fastest
        pool.run(
            vec![300u64, 200, 100],
            |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms as u32
            },
            &mut collector,
        )
        .await;

        assert_eq!(collector.order, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let pool = BoundedWorkerPool::new(2).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut collector = Collector::default();

        let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
        pool.run(
            (0..8u32).collect(),
            move |n| {
                let (current, peak) = (Arc::clone(&c), Arc::clone(&p));
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    n
                }
            },
            &mut collector,
        )
        .await;

        assert_eq!(collector.values.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let pool = BoundedWorkerPool::new(2).unwrap();
        let mut collector = Collector::default();

        pool.run(
            vec![1u32, 2, 3],
            |n| async move {
                if n == 2 {
                    panic!("boom on {n}");
                }
                n
            },
            &mut collector,
        )
        .await;

        assert_eq!(collector.values.len(), 3);
        let faults: Vec<_> = collector
            .values
            .iter()
            .filter_map(|v| v.as_ref().err())
            .collect();
        assert_eq!(faults, vec![&WorkerFault::Panicked("boom on 2".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let pool = BoundedWorkerPool::new(1).unwrap();
        let mut collector = Collector::default();

        let delivered = pool
            .run(Vec::<u32>::new(), |n| async move { n }, &mut collector)
            .await;

        assert_eq!(delivered, 0);
        assert!(collector.order.is_empty());
    }
}
