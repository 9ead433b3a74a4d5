//! The saga command wire model.
//!
//! A [`SagaCommand`] is both the message that drives the coordinator's state
//! machine and the only state a running saga instance has: the instance's
//! "program counter" is encoded entirely in the message, so the coordinator
//! itself stays stateless across transitions.
//!
//! Commands are JSON on the wire, with the integer-coded kind and the field
//! names fixed for cross-service compatibility:
//!
//! ```json
//! { "SagaName": "order", "SagaID": "7f3a...", "Name": 1,
//!   "TransactionID": "charge-payment", "CompensationID": "",
//!   "SagaParams": { "order_id": 42 } }
//! ```
//!
//! Empty strings denote unset ids. Every command is created fresh for one
//! state transition, published, consumed once, and discarded.

use crate::step::SagaParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A command kind outside the known wire range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown command {0}")]
pub struct UnknownCommandKind(pub u8);

/// The kind of a [`SagaCommand`], integer-coded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CommandKind {
    /// Start a new saga instance.
    BeginSaga,
    /// Execute the named transaction (or compensation).
    BeginTransaction,
    /// The named step finished; advance forward or continue unwinding.
    EndTransaction,
    /// The named step failed transiently; re-dispatch it.
    AbortTransaction,
    /// The named step aborted; start compensating.
    AbortSaga,
    /// Terminal: the instance is finished.
    EndSaga,
}

impl CommandKind {
    /// Stable lowercase name, used for logging and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeginSaga => "begin_saga",
            Self::BeginTransaction => "begin_transaction",
            Self::EndTransaction => "end_transaction",
            Self::AbortTransaction => "abort_transaction",
            Self::AbortSaga => "abort_saga",
            Self::EndSaga => "end_saga",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CommandKind> for u8 {
    fn from(kind: CommandKind) -> Self {
        match kind {
            CommandKind::BeginSaga => 0,
            CommandKind::BeginTransaction => 1,
            CommandKind::EndTransaction => 2,
            CommandKind::AbortTransaction => 3,
            CommandKind::AbortSaga => 4,
            CommandKind::EndSaga => 5,
        }
    }
}

impl TryFrom<u8> for CommandKind {
    type Error = UnknownCommandKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::BeginSaga),
            1 => Ok(Self::BeginTransaction),
            2 => Ok(Self::EndTransaction),
            3 => Ok(Self::AbortTransaction),
            4 => Ok(Self::AbortSaga),
            5 => Ok(Self::EndSaga),
            other => Err(UnknownCommandKind(other)),
        }
    }
}

/// One saga state transition on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCommand {
    /// Which saga definition applies.
    #[serde(rename = "SagaName")]
    pub saga_name: String,

    /// Correlates all messages belonging to one running instance; also the
    /// partition key, so key-aware brokers serialize a single instance.
    #[serde(rename = "SagaID")]
    pub saga_id: String,

    /// The command kind.
    #[serde(rename = "Name")]
    pub kind: CommandKind,

    /// The transaction or compensation step this message concerns.
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: String,

    /// Set when the next hop is a compensation rather than a forward step.
    #[serde(rename = "CompensationID", default)]
    pub compensation_id: String,

    /// Opaque business payload threaded through every step.
    #[serde(rename = "SagaParams", default)]
    pub saga_params: SagaParams,
}

impl SagaCommand {
    fn new(saga_name: impl Into<String>, saga_id: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            saga_name: saga_name.into(),
            saga_id: saga_id.into(),
            kind,
            transaction_id: String::new(),
            compensation_id: String::new(),
            saga_params: SagaParams::Null,
        }
    }

    /// Start a new saga instance.
    #[must_use]
    pub fn begin_saga(
        saga_name: impl Into<String>,
        saga_id: impl Into<String>,
        params: SagaParams,
    ) -> Self {
        let mut command = Self::new(saga_name, saga_id, CommandKind::BeginSaga);
        command.saga_params = params;
        command
    }

    /// Execute the named step.
    #[must_use]
    pub fn begin_transaction(
        saga_name: impl Into<String>,
        saga_id: impl Into<String>,
        transaction_id: impl Into<String>,
        params: SagaParams,
    ) -> Self {
        let mut command = Self::new(saga_name, saga_id, CommandKind::BeginTransaction);
        command.transaction_id = transaction_id.into();
        command.saga_params = params;
        command
    }

    /// The named step finished.
    #[must_use]
    pub fn end_transaction(
        saga_name: impl Into<String>,
        saga_id: impl Into<String>,
        transaction_id: impl Into<String>,
        params: SagaParams,
    ) -> Self {
        let mut command = Self::new(saga_name, saga_id, CommandKind::EndTransaction);
        command.transaction_id = transaction_id.into();
        command.saga_params = params;
        command
    }

    /// The named step finished and the next hop is a compensation: an
    /// `EndTransaction` carrying the compensation to run.
    #[must_use]
    pub fn end_transaction_compensate(
        saga_name: impl Into<String>,
        saga_id: impl Into<String>,
        transaction_id: impl Into<String>,
        compensation_id: impl Into<String>,
        params: SagaParams,
    ) -> Self {
        let mut command = Self::end_transaction(saga_name, saga_id, transaction_id, params);
        command.compensation_id = compensation_id.into();
        command
    }

    /// The named step failed transiently; re-dispatch it unchanged.
    #[must_use]
    pub fn abort_transaction(
        saga_name: impl Into<String>,
        saga_id: impl Into<String>,
        transaction_id: impl Into<String>,
        params: SagaParams,
    ) -> Self {
        let mut command = Self::new(saga_name, saga_id, CommandKind::AbortTransaction);
        command.transaction_id = transaction_id.into();
        command.saga_params = params;
        command
    }

    /// The named step aborted; unwind to the nearest save point. Parameters
    /// are carried so compensations see the same payload the forward steps
    /// did.
    #[must_use]
    pub fn abort_saga(
        saga_name: impl Into<String>,
        saga_id: impl Into<String>,
        transaction_id: impl Into<String>,
        params: SagaParams,
    ) -> Self {
        let mut command = Self::new(saga_name, saga_id, CommandKind::AbortSaga);
        command.transaction_id = transaction_id.into();
        command.saga_params = params;
        command
    }

    /// Terminal: the instance is finished.
    #[must_use]
    pub fn end_saga(saga_name: impl Into<String>, saga_id: impl Into<String>) -> Self {
        Self::new(saga_name, saga_id, CommandKind::EndSaga)
    }
}
