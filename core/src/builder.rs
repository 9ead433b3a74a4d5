//! Fluent construction of immutable [`Saga`] definitions.
//!
//! A saga is declared as an ordered chain of steps, each finalized with
//! either a compensation or an explicit statement that it is irreversible:
//!
//! ```
//! use sagaflow_core::builder::Builder;
//! use sagaflow_core::step::{CompensationOutcome, StepOutcome};
//!
//! let saga = Builder::new("order-fulfillment")
//!     .begin("reserve-inventory", |_params| async { StepOutcome::Completed })
//!     .with_compensation("release-inventory", |_params| async {
//!         CompensationOutcome::Completed
//!     })
//!     .then("charge-payment", |_params| async { StepOutcome::Completed })
//!     .save_point()
//!     .with_compensation("refund-payment", |_params| async {
//!         CompensationOutcome::Completed
//!     })
//!     .then("notify-customer", |_params| async { StepOutcome::Completed })
//!     .no_compensation()
//!     .end();
//!
//! assert_eq!(saga.first_transaction(), Some("reserve-inventory"));
//! ```
//!
//! The builder owns the mutable in-progress step list; only [`Builder::end`]
//! exposes an immutable [`Saga`]. Backward compensation links are computed
//! as each step is finalized: the nearest previously registered compensation
//! is threaded past irreversible steps, and the chain is cut when the walk
//! crosses a save point, so an abort never undoes work that a save point
//! checkpointed.

use crate::saga::Saga;
use crate::step::{
    CompensationOutcome, SagaParams, StepOutcome, compensation_fn, transaction_fn,
};
use crate::transaction::{Compensation, Transaction};
use std::collections::HashMap;
use std::future::Future;

/// One finalized step: its transaction plus the optional compensation that
/// undoes it.
#[derive(Debug, Clone)]
struct Step {
    transaction: Transaction,
    compensation: Option<Compensation>,
}

/// Builder for a [`Saga`] definition.
#[derive(Debug, Clone)]
pub struct Builder {
    saga_name: String,
    steps: Vec<Step>,
}

impl Builder {
    /// Start an empty definition with the given saga name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            saga_name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Declare the first step of the saga.
    #[must_use]
    pub fn begin<F, Fut>(self, name: impl Into<String>, func: F) -> TransactionBuilder
    where
        F: Fn(SagaParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutcome> + Send + 'static,
    {
        TransactionBuilder {
            transaction: Transaction::new(name, transaction_fn(func)),
            builder: self,
        }
    }

    /// Declare the next step of the saga, linking the previous step's
    /// forward pointer to it.
    ///
    /// Calling `then` before [`begin`](Self::begin) yields a step with no
    /// predecessor link, i.e. a first element.
    #[must_use]
    pub fn then<F, Fut>(mut self, name: impl Into<String>, func: F) -> TransactionBuilder
    where
        F: Fn(SagaParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutcome> + Send + 'static,
    {
        let transaction = Transaction::new(name, transaction_fn(func));
        if let Some(previous) = self.steps.last_mut() {
            previous.transaction.next_transaction = Some(transaction.name.clone());
        }
        TransactionBuilder {
            transaction,
            builder: self,
        }
    }

    /// Materialize the definition into an immutable [`Saga`].
    ///
    /// An empty builder yields a named saga with no first transaction; such
    /// a saga ends immediately when begun.
    #[must_use]
    pub fn end(self) -> Saga {
        let first_transaction = self.steps.first().map(|s| s.transaction.name.clone());

        let mut transactions = HashMap::new();
        let mut compensations = HashMap::new();
        for step in self.steps {
            if let Some(compensation) = step.compensation {
                compensations.insert(compensation.name.clone(), compensation);
            }
            transactions.insert(step.transaction.name.clone(), step.transaction);
        }

        Saga::new(self.saga_name, first_transaction, transactions, compensations)
    }

    /// Walk backward over already-finalized steps and return the nearest
    /// registered compensation name, skipping irreversible steps.
    ///
    /// The walk stops without a match when it reaches a save point: steps
    /// at or before a save point are never undone by an abort that happens
    /// after it.
    fn nearest_compensation(&self) -> Option<String> {
        for step in self.steps.iter().rev() {
            if step.transaction.is_save_point {
                return None;
            }
            if let Some(compensation) = &step.compensation {
                return Some(compensation.name.clone());
            }
        }
        None
    }
}

/// Builder for a single in-progress step.
///
/// Produced by [`Builder::begin`] and [`Builder::then`]; consumed by
/// [`with_compensation`](Self::with_compensation) or
/// [`no_compensation`](Self::no_compensation), which finalize the step and
/// hand back the saga [`Builder`].
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    builder: Builder,
    transaction: Transaction,
}

impl TransactionBuilder {
    /// Mark the current step as a save point.
    ///
    /// Aborting the saga later unwinds compensations back to this step and
    /// no further; the save point's own effects are the state that
    /// survives the rollback.
    #[must_use]
    pub fn save_point(mut self) -> Self {
        self.transaction.is_save_point = true;
        self
    }

    /// Finalize the current step with an undo action.
    ///
    /// The compensation must be idempotent and is linked backward to the
    /// nearest prior compensation so that multi-step unwinds thread past
    /// irreversible steps.
    #[must_use]
    pub fn with_compensation<F, Fut>(mut self, name: impl Into<String>, func: F) -> Builder
    where
        F: Fn(SagaParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompensationOutcome> + Send + 'static,
    {
        let mut compensation = Compensation::new(name, compensation_fn(func));
        compensation.next_compensation = self.builder.nearest_compensation();
        self.transaction.compensation = Some(compensation.name.clone());

        self.builder.steps.push(Step {
            transaction: self.transaction,
            compensation: Some(compensation),
        });
        self.builder
    }

    /// Finalize the current step as irreversible.
    ///
    /// The step still points at the nearest prior compensation, so an abort
    /// at or after this step unwinds everything reversible before it.
    #[must_use]
    pub fn no_compensation(mut self) -> Builder {
        self.transaction.compensation = self.builder.nearest_compensation();
        self.builder.steps.push(Step {
            transaction: self.transaction,
            compensation: None,
        });
        self.builder
    }
}
