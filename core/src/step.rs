//! Step outcomes and function types for saga steps.
//!
//! A saga step is an async function over the saga's opaque parameters. Its
//! result is a tagged outcome rather than an error sentinel, so the
//! coordinator never has to inspect error identity to decide between
//! retrying a step and unwinding the saga:
//!
//! - [`StepOutcome`] is returned by forward transactions and can request an
//!   abort.
//! - [`CompensationOutcome`] is returned by compensations and deliberately
//!   has no abort variant: an undo action can be retried, but it can never
//!   start a second rollback.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Opaque business payload threaded through every step of a saga instance.
///
/// The coordinator never interprets it; it is carried verbatim in each
/// [`SagaCommand`](crate::command::SagaCommand) round trip.
pub type SagaParams = serde_json::Value;

/// Result of executing a forward transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step finished; the saga advances to the next transaction.
    Completed,

    /// Transient failure; the coordinator re-dispatches the same step with
    /// identical parameters. Backoff, if any, belongs inside the step
    /// function itself.
    Retry(String),

    /// Unrecoverable failure; the saga unwinds compensations back to the
    /// nearest preceding save point.
    Abort(String),
}

/// Result of executing a compensation.
///
/// Compensations must be idempotent: under at-least-once delivery the same
/// undo action may run more than once with the same parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// The undo action finished; unwinding continues backward.
    Completed,

    /// Transient failure; the coordinator re-dispatches the same
    /// compensation.
    Retry(String),
}

impl From<CompensationOutcome> for StepOutcome {
    fn from(outcome: CompensationOutcome) -> Self {
        match outcome {
            CompensationOutcome::Completed => Self::Completed,
            CompensationOutcome::Retry(reason) => Self::Retry(reason),
        }
    }
}

/// Async business action executed for a forward transaction.
pub type TransactionFn =
    Arc<dyn Fn(SagaParams) -> BoxFuture<'static, StepOutcome> + Send + Sync>;

/// Async undo action executed for a compensation.
pub type CompensationFn =
    Arc<dyn Fn(SagaParams) -> BoxFuture<'static, CompensationOutcome> + Send + Sync>;

/// Wrap an async closure into a [`TransactionFn`].
pub fn transaction_fn<F, Fut>(func: F) -> TransactionFn
where
    F: Fn(SagaParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    Arc::new(move |params| -> BoxFuture<'static, StepOutcome> { Box::pin(func(params)) })
}

/// Wrap an async closure into a [`CompensationFn`].
pub fn compensation_fn<F, Fut>(func: F) -> CompensationFn
where
    F: Fn(SagaParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CompensationOutcome> + Send + 'static,
{
    Arc::new(move |params| -> BoxFuture<'static, CompensationOutcome> {
        Box::pin(func(params))
    })
}
