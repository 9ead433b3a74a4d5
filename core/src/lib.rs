//! # Sagaflow Core
//!
//! Core model for message-driven saga orchestration.
//!
//! This crate provides the building blocks the
//! [coordinator](../sagaflow_runtime/index.html) executes:
//!
//! - **Saga definitions**: an immutable, named chain of transactions with
//!   per-step compensations, built through a fluent [`builder::Builder`].
//! - **Step outcomes**: tagged results ([`step::StepOutcome`],
//!   [`step::CompensationOutcome`]) instead of error sentinels, so "retry
//!   this step" and "unwind the saga" are distinct variants.
//! - **The command wire model**: [`command::SagaCommand`], the JSON message
//!   that both drives the coordinator's state machine and carries all
//!   per-instance state.
//! - **The broker abstraction**: [`broker::Broker`], a thin
//!   publish/subscribe trait with swappable backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   Builder    ┌──────────────┐   register    ┌─────────────┐
//! │  steps  │ ───────────► │     Saga     │ ────────────► │ Coordinator │
//! └─────────┘              │ (immutable)  │               └──────┬──────┘
//!                          └──────────────┘                      │
//!                                                subscribe + publish
//!                                                                │
//!                          ┌──────────────┐               ┌──────▼──────┐
//!                          │ SagaCommand  │ ◄───────────► │   Broker    │
//!                          │ (JSON, keyed │    topic      │  (backend)  │
//!                          │  by SagaID)  │               └─────────────┘
//!                          └──────────────┘
//! ```
//!
//! Every state transition is one command consumed and one command published
//! back to the same topic; the saga's "program counter" rides entirely in
//! the message.

/// Fluent construction of saga definitions.
pub mod builder;

/// The broker publish/subscribe abstraction.
pub mod broker;

/// The saga command wire model.
pub mod command;

/// Dependency seams (clock).
pub mod environment;

/// Immutable, executable saga definitions.
pub mod saga;

/// Step outcomes and function types.
pub mod step;

/// Transaction and compensation value objects.
pub mod transaction;

pub use builder::{Builder, TransactionBuilder};
pub use broker::{
    Acker, Broker, BrokerError, Delivery, Handler, Message, NoopAcker, SubscribeOptions,
    Subscriber,
};
pub use command::{CommandKind, SagaCommand, UnknownCommandKind};
pub use environment::{Clock, SystemClock};
pub use saga::{Saga, UnknownStep};
pub use step::{
    CompensationFn, CompensationOutcome, SagaParams, StepOutcome, TransactionFn,
    compensation_fn, transaction_fn,
};
pub use transaction::{Compensation, Transaction};
