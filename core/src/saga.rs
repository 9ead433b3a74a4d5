//! Immutable, executable saga definitions.

use crate::step::{SagaParams, StepOutcome};
use crate::transaction::{Compensation, Transaction};
use std::collections::HashMap;
use thiserror::Error;

/// A step name was looked up that exists in neither the transaction nor the
/// compensation table of the saga.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no step named {step} in saga {saga}")]
pub struct UnknownStep {
    /// Name of the saga that was consulted.
    pub saga: String,
    /// The step name that could not be resolved.
    pub step: String,
}

/// An immutable saga definition: a named, directed chain of transactions
/// with their compensations.
///
/// Built once via [`Builder::end`](crate::builder::Builder::end), registered
/// into the coordinator's registry, and never mutated afterwards. The
/// coordinator only ever walks the chain ("next step after X", "compensation
/// for X") and executes named steps; all per-instance state rides in the
/// [`SagaCommand`](crate::command::SagaCommand) messages themselves.
#[derive(Debug, Clone)]
pub struct Saga {
    name: String,
    first_transaction: Option<String>,
    transactions: HashMap<String, Transaction>,
    compensations: HashMap<String, Compensation>,
}

impl Saga {
    pub(crate) fn new(
        name: String,
        first_transaction: Option<String>,
        transactions: HashMap<String, Transaction>,
        compensations: HashMap<String, Compensation>,
    ) -> Self {
        Self {
            name,
            first_transaction,
            transactions,
            compensations,
        }
    }

    /// Unique saga name, used as the routing key in
    /// [`SagaCommand::saga_name`](crate::command::SagaCommand::saga_name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the first step, or `None` for an empty saga.
    #[must_use]
    pub fn first_transaction(&self) -> Option<&str> {
        self.first_transaction.as_deref()
    }

    /// The next hop after the named step.
    ///
    /// For a transaction this is its forward-chain pointer; for a
    /// compensation it is the backward pointer to the previous step's
    /// compensation, which is what lets the coordinator unwind one hop per
    /// `EndTransaction` round trip. Returns `None` for a terminal or
    /// unknown step.
    #[must_use]
    pub fn next(&self, step: &str) -> Option<&str> {
        if let Some(transaction) = self.transactions.get(step) {
            return transaction.next_transaction();
        }
        self.compensations
            .get(step)
            .and_then(Compensation::next_compensation)
    }

    /// The compensation to start unwinding from when the named transaction
    /// aborts.
    #[must_use]
    pub fn compensation(&self, transaction: &str) -> Option<&str> {
        self.transactions
            .get(transaction)
            .and_then(Transaction::compensation)
    }

    /// Number of forward transactions in the definition.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the definition has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Execute the named step with the given parameters.
    ///
    /// The step may be a forward transaction or a compensation; the
    /// coordinator drives both through the same `BeginTransaction` path. A
    /// compensation's outcome is widened into [`StepOutcome`], which can
    /// never be [`StepOutcome::Abort`] by construction.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStep`] when the name resolves to neither table.
    pub async fn execute(
        &self,
        step: &str,
        params: &SagaParams,
    ) -> Result<StepOutcome, UnknownStep> {
        if let Some(transaction) = self.transactions.get(step) {
            return Ok((transaction.func)(params.clone()).await);
        }
        if let Some(compensation) = self.compensations.get(step) {
            return Ok((compensation.func)(params.clone()).await.into());
        }
        Err(UnknownStep {
            saga: self.name.clone(),
            step: step.to_string(),
        })
    }
}
