//! # Sagaflow Runtime
//!
//! The saga execution coordinator and its operational surroundings.
//!
//! This crate provides the [`Coordinator`]: a message-driven orchestrator
//! that consumes [`SagaCommand`](sagaflow_core::SagaCommand)s from a single
//! broker topic, advances the matching saga's state machine, and publishes
//! the next command back to the same topic. Deciding the next step and
//! executing it are deliberately decoupled - every transition is a full
//! round trip through the broker, so each hop is independently
//! crash-recoverable and many instances interleave on one topic.
//!
//! ## Core Components
//!
//! - **Coordinator**: the state machine over incoming commands
//! - **Worker pool**: bounded fan-out so slow business steps never stall
//!   broker consumption
//! - **Dead letter queue**: bounded capture of commands that failed to
//!   decode or process (they were already acked and will not redeliver)
//! - **Health / metrics**: operational visibility for a headless,
//!   broker-driven component whose only synchronous caller is the topic
//!
//! ## Example
//!
//! ```ignore
//! use sagaflow_runtime::{Coordinator, StartOptions, WorkerPool};
//!
//! let coordinator = Coordinator::new(broker, WorkerPool::new(16), "saga-commands");
//! coordinator
//!     .start(StartOptions::new().with_saga_routes(vec![order_saga]))
//!     .await?;
//!
//! // Kick off an instance:
//! coordinator
//!     .write(&SagaCommand::begin_saga("order", saga_id, params))
//!     .await?;
//! ```

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// The saga execution coordinator.
pub mod coordinator;

/// Prometheus metrics for observability.
pub mod metrics;

/// Retry logic with exponential backoff, for use inside saga steps.
pub mod retry;

/// Bounded worker pool for command processing.
pub mod worker_pool;

/// Error types for the coordinator runtime.
pub mod error {
    use sagaflow_core::broker::BrokerError;
    use sagaflow_core::saga::UnknownStep;
    use thiserror::Error;

    /// Errors surfaced by the [`Coordinator`](crate::Coordinator).
    ///
    /// Configuration errors (`NoSagaRoutes`, `UnknownSaga`, `UnknownStep`)
    /// are returned synchronously and the offending command is dropped - it
    /// was acked on receipt, so there is no redelivery. I/O errors
    /// (`Marshal`, `Publish`, `Subscribe`) mean the in-flight transition
    /// was lost and requires external reconciliation.
    #[derive(Error, Debug)]
    pub enum CoordinatorError {
        /// `start` was called without any saga routes.
        #[error("no saga route for handler")]
        NoSagaRoutes,

        /// The command names a saga absent from the registry.
        #[error("no saga with name {0} exists")]
        UnknownSaga(String),

        /// The command names a step absent from its saga.
        #[error(transparent)]
        UnknownStep(#[from] UnknownStep),

        /// The outgoing command could not be serialized.
        #[error("failed command marshalling: {0}")]
        Marshal(#[from] serde_json::Error),

        /// The outgoing command could not be published.
        #[error("produce saga command failed: {0}")]
        Publish(#[source] BrokerError),

        /// The saga topic subscription could not be established.
        #[error("failed to subscribe to saga topic: {0}")]
        Subscribe(#[source] BrokerError),
    }
}

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but experiencing issues (e.g., dead letters
    /// accumulating)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Optional metadata (e.g., metrics, error counts)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall system status.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall system status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: Utc::now(),
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// A saga command that could not be decoded or processed.
///
/// The raw body is kept so operators can inspect or replay it manually;
/// the coordinator itself never retries dead letters (the message was
/// already acknowledged).
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Raw message body as received from the broker.
    pub body: Vec<u8>,

    /// The error that sent the command here.
    pub error: String,

    /// When the failure happened.
    pub failed_at: DateTime<Utc>,
}

/// Bounded FIFO queue of failed saga commands.
///
/// Oldest entries are dropped when the queue is full. Thread-safe and
/// cheaply cloneable; clones share the same storage.
#[derive(Debug)]
pub struct DeadLetterQueue {
    queue: Arc<Mutex<VecDeque<DeadLetter>>>,
    max_size: usize,
}

impl DeadLetterQueue {
    /// Create a new dead letter queue holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    /// Record a failed command.
    ///
    /// If the queue is full, the oldest entry is dropped.
    pub fn push(&self, body: Vec<u8>, error: String) {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            ::metrics::counter!("saga_dead_letters_dropped_total").increment(1);
            tracing::warn!(
                max_size = self.max_size,
                "dead letter queue at capacity, dropping oldest entry"
            );
        }

        queue.push_back(DeadLetter {
            body,
            error,
            failed_at: Utc::now(),
        });

        // Queue size is bounded by max_size, far below f64 precision loss.
        #[allow(clippy::cast_precision_loss)]
        ::metrics::gauge!("saga_dead_letters").set(queue.len() as f64);
        ::metrics::counter!("saga_dead_letters_total").increment(1);
    }

    /// Get the current queue size
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain all entries from the queue
    pub fn drain(&self) -> Vec<DeadLetter> {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();

        ::metrics::gauge!("saga_dead_letters").set(0.0);
        tracing::info!(count = entries.len(), "drained dead letter queue");

        entries
    }

    /// Peek at the oldest entry without removing it
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter> {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Get the maximum queue size
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Clone for DeadLetterQueue {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}

pub use coordinator::{Coordinator, StartOptions};
pub use error::CoordinatorError;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use worker_pool::WorkerPool;

#[cfg(test)]
mod tests {
    use super::*;

    mod health_tests {
        use super::*;

        #[test]
        fn worst_status_wins() {
            assert_eq!(
                HealthStatus::Healthy.worst(HealthStatus::Degraded),
                HealthStatus::Degraded
            );
            assert_eq!(
                HealthStatus::Degraded.worst(HealthStatus::Unhealthy),
                HealthStatus::Unhealthy
            );
            assert_eq!(
                HealthStatus::Healthy.worst(HealthStatus::Healthy),
                HealthStatus::Healthy
            );
        }

        #[test]
        fn report_aggregates_to_worst_check() {
            let report = HealthReport::new(vec![
                HealthCheck::healthy("coordinator"),
                HealthCheck::degraded("dead-letters", "3 entries"),
            ]);
            assert_eq!(report.status, HealthStatus::Degraded);
            assert!(!report.is_healthy());
        }

        #[test]
        fn status_display() {
            assert_eq!(format!("{}", HealthStatus::Healthy), "healthy");
            assert_eq!(format!("{}", HealthStatus::Degraded), "degraded");
            assert_eq!(format!("{}", HealthStatus::Unhealthy), "unhealthy");
        }
    }

    mod dlq_tests {
        use super::*;

        #[test]
        fn push_and_peek() {
            let dlq = DeadLetterQueue::new(10);
            assert!(dlq.is_empty());

            dlq.push(b"not json".to_vec(), "decode error".to_string());
            assert_eq!(dlq.len(), 1);

            let entry = dlq.peek();
            assert!(entry.is_some());
            if let Some(entry) = entry {
                assert_eq!(entry.body, b"not json");
                assert_eq!(entry.error, "decode error");
            }
        }

        #[test]
        fn drops_oldest_at_capacity() {
            let dlq = DeadLetterQueue::new(2);
            dlq.push(b"first".to_vec(), "e1".to_string());
            dlq.push(b"second".to_vec(), "e2".to_string());
            dlq.push(b"third".to_vec(), "e3".to_string());

            assert_eq!(dlq.len(), 2);
            let oldest = dlq.peek();
            assert!(oldest.is_some_and(|entry| entry.body == b"second"));
        }

        #[test]
        fn drain_empties_the_queue() {
            let dlq = DeadLetterQueue::new(10);
            dlq.push(b"a".to_vec(), "e".to_string());
            dlq.push(b"b".to_vec(), "e".to_string());

            let drained = dlq.drain();
            assert_eq!(drained.len(), 2);
            assert!(dlq.is_empty());
        }

        #[test]
        fn clones_share_storage() {
            let dlq = DeadLetterQueue::new(10);
            let clone = dlq.clone();
            dlq.push(b"a".to_vec(), "e".to_string());
            assert_eq!(clone.len(), 1);
        }
    }
}
