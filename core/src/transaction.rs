//! Transaction and compensation value objects.
//!
//! Both are created once through the [`Builder`](crate::builder::Builder) at
//! service startup and are immutable afterwards; the [`Saga`](crate::saga::Saga)
//! registry keeps them alive for the lifetime of the process.

use crate::step::{CompensationFn, TransactionFn};
use std::fmt;

/// One forward step of a saga.
///
/// Carries the forward-chain pointer to the next transaction and the name of
/// the compensation that undoes it (or, for irreversible steps, the nearest
/// prior compensation, so unwind chains can skip over them).
#[derive(Clone)]
pub struct Transaction {
    pub(crate) name: String,
    pub(crate) func: TransactionFn,
    pub(crate) next_transaction: Option<String>,
    pub(crate) compensation: Option<String>,
    pub(crate) is_save_point: bool,
}

impl Transaction {
    pub(crate) fn new(name: impl Into<String>, func: TransactionFn) -> Self {
        Self {
            name: name.into(),
            func,
            next_transaction: None,
            compensation: None,
            is_save_point: false,
        }
    }

    /// Name of this step, unique within its saga.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forward-chain pointer; `None` marks the last step.
    #[must_use]
    pub fn next_transaction(&self) -> Option<&str> {
        self.next_transaction.as_deref()
    }

    /// Compensation to start from when this step (or a later one) aborts.
    #[must_use]
    pub fn compensation(&self) -> Option<&str> {
        self.compensation.as_deref()
    }

    /// Whether this step bounds how far back an abort unwinds.
    #[must_use]
    pub const fn is_save_point(&self) -> bool {
        self.is_save_point
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("next_transaction", &self.next_transaction)
            .field("compensation", &self.compensation)
            .field("is_save_point", &self.is_save_point)
            .finish_non_exhaustive()
    }
}

/// The undo action paired with a transaction.
#[derive(Clone)]
pub struct Compensation {
    pub(crate) name: String,
    pub(crate) func: CompensationFn,
    pub(crate) next_compensation: Option<String>,
}

impl Compensation {
    pub(crate) fn new(name: impl Into<String>, func: CompensationFn) -> Self {
        Self {
            name: name.into(),
            func,
            next_compensation: None,
        }
    }

    /// Name of this compensation, unique within its saga.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backward-chain pointer to the previous step's compensation; `None`
    /// ends the unwind.
    #[must_use]
    pub fn next_compensation(&self) -> Option<&str> {
        self.next_compensation.as_deref()
    }
}

impl fmt::Debug for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compensation")
            .field("name", &self.name)
            .field("next_compensation", &self.next_compensation)
            .finish_non_exhaustive()
    }
}
