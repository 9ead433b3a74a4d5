//! Bounded worker pool for saga command processing.
//!
//! The coordinator acknowledges every inbound message immediately and hands
//! the actual work to this pool, so broker consumption rate is decoupled
//! from business-logic latency. Concurrency is bounded by a semaphore;
//! [`WorkerPool::submit`] waits for a free slot, which is the pool's
//! back-pressure policy - when every worker is busy, the subscription
//! handler (and with it the broker's dispatch loop) blocks instead of
//! queueing unboundedly.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A bounded pool of concurrently running tasks.
///
/// Cheap to clone; clones share the same slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Create a pool running at most `capacity` tasks concurrently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "worker pool capacity must be greater than 0");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Maximum number of concurrent tasks.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of currently free worker slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run a task on the pool.
    ///
    /// Waits until a worker slot is free, then spawns the task and returns;
    /// the task itself runs in the background and releases its slot on
    /// completion. Submitted tasks are never cancelled by the pool.
    pub async fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            // The semaphore is never closed; this is unreachable in
            // practice but must not bring the dispatch loop down.
            tracing::error!("worker pool semaphore closed, dropping task");
            return;
        };

        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
    }
}
