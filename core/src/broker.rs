//! Broker abstraction for asynchronous messaging.
//!
//! This module provides the [`Broker`] trait the coordinator publishes and
//! subscribes through. The trait is deliberately thin - publish bytes to a
//! topic, subscribe a handler to a topic - so backends stay swappable:
//!
//! - [`InMemoryBroker`](../../sagaflow_testing/struct.InMemoryBroker.html) - for testing (fast, deterministic)
//! - [`RedpandaBroker`](../../sagaflow_redpanda/struct.RedpandaBroker.html) - for production (Kafka-compatible)
//!
//! # Contract assumed by the coordinator
//!
//! - **At-least-once delivery**: a message may be delivered more than once;
//!   handlers and compensations must be idempotent.
//! - **Key affinity**: messages carrying the same [`Message::key`] should
//!   land on the same partition, so a key-aware backend serializes all
//!   traffic for one saga instance.
//! - **Fire-and-forget ack**: [`Delivery::ack`] must be callable
//!   immediately on receipt, before processing, without affecting
//!   redelivery of other in-flight messages.
//!
//! # Dyn Compatibility
//!
//! [`Broker`] uses explicit boxed-future returns instead of `async fn` so
//! it can be used as a trait object (`Arc<dyn Broker>`) and captured by the
//! coordinator's subscription handler.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to acknowledge a delivery
    #[error("Ack failed: {0}")]
    AckFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Generic error for other failures
    #[error("Broker error: {0}")]
    Other(String),
}

/// A message sent to or received from the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Transport headers, passed through verbatim.
    pub headers: HashMap<String, String>,
    /// Partition key; the coordinator sets it to the saga instance id.
    pub key: Vec<u8>,
    /// Opaque payload bytes (JSON saga commands in this crate's use).
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message with the given body and no key or headers.
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            headers: HashMap::new(),
            key: Vec::new(),
            body,
        }
    }

    /// Set the partition key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    /// Add a transport header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Acknowledgment hook attached to a [`Delivery`].
///
/// Implementations must be cheap and safe to call exactly once, immediately
/// on receipt; committing the acknowledgment to the broker may happen in
/// the background.
pub trait Acker: Send + Sync {
    /// Mark the delivery as processed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] when the acknowledgment cannot be
    /// recorded.
    fn ack(&self) -> Result<(), BrokerError>;
}

/// An acker that does nothing, for backends without acknowledgment state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAcker;

impl Acker for NoopAcker {
    fn ack(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// One message handed to a subscription handler.
pub struct Delivery {
    topic: String,
    message: Message,
    timestamp: DateTime<Utc>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Assemble a delivery; called by broker backends.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        message: Message,
        timestamp: DateTime<Utc>,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            topic: topic.into(),
            message,
            timestamp,
            acker,
        }
    }

    /// Topic the message arrived on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The delivered message.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// When the backend received the message.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] when the acknowledgment cannot be
    /// recorded.
    pub fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("message", &self.message)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// Async callback invoked for every delivery of a subscription.
pub type Handler =
    Arc<dyn Fn(Delivery) -> BoxFuture<'static, Result<(), BrokerError>> + Send + Sync>;

/// Handle returned by [`Broker::subscribe`].
pub trait Subscriber: Send + Sync {
    /// Topic this subscription consumes.
    fn topic(&self) -> &str;

    /// Stop consuming. In-flight handler invocations run to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] when the backend fails to tear the
    /// subscription down.
    fn unsubscribe(&self) -> Result<(), BrokerError>;
}

/// Subscription tuning passed to [`Broker::subscribe`].
///
/// All fields are optional; backends fall back to their own defaults and
/// ignore options they have no equivalent for.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    buffer_size: Option<usize>,
}

impl SubscribeOptions {
    /// Create options with every field unset.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            consumer_group: None,
            auto_offset_reset: None,
            buffer_size: None,
        }
    }

    /// Set the consumer group, letting several coordinator instances share
    /// the topic's workload.
    #[must_use]
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Where a new consumer group starts reading (`"earliest"` or
    /// `"latest"`).
    #[must_use]
    pub fn with_auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// In-memory buffer between the backend's consumer and the handler.
    #[must_use]
    pub const fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Configured consumer group, if any.
    #[must_use]
    pub fn consumer_group(&self) -> Option<&str> {
        self.consumer_group.as_deref()
    }

    /// Configured offset reset policy, if any.
    #[must_use]
    pub fn auto_offset_reset(&self) -> Option<&str> {
        self.auto_offset_reset.as_deref()
    }

    /// Configured buffer size, if any.
    #[must_use]
    pub const fn buffer_size(&self) -> Option<usize> {
        self.buffer_size
    }
}

/// Trait for broker implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; the coordinator shares one
/// broker across its worker pool.
pub trait Broker: Send + Sync {
    /// Publish a message to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the publish operation
    /// fails. The caller decides whether to retry; this layer does not.
    fn publish(&self, topic: &str, message: &Message)
    -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Subscribe a handler to a topic.
    ///
    /// The handler is invoked once per delivery until the returned
    /// [`Subscriber`] is dropped or unsubscribed. Handler errors are the
    /// backend's to log; they must not stop consumption.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> BoxFuture<'_, Result<Box<dyn Subscriber>, BrokerError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_builder_sets_key_and_headers() {
        let message = Message::new(b"payload".to_vec())
            .with_key("saga-1")
            .with_header("content-type", "application/json");

        assert_eq!(message.key, b"saga-1");
        assert_eq!(message.body, b"payload");
        assert_eq!(
            message.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn subscribe_options_default_to_unset() {
        let options = SubscribeOptions::new();
        assert_eq!(options.consumer_group(), None);
        assert_eq!(options.auto_offset_reset(), None);
        assert_eq!(options.buffer_size(), None);

        let options = options
            .with_consumer_group("saga-coordinator")
            .with_auto_offset_reset("earliest")
            .with_buffer_size(256);
        assert_eq!(options.consumer_group(), Some("saga-coordinator"));
        assert_eq!(options.auto_offset_reset(), Some("earliest"));
        assert_eq!(options.buffer_size(), Some(256));
    }

    #[test]
    fn delivery_exposes_message_and_acks() {
        let delivery = Delivery::new(
            "saga-commands",
            Message::new(b"{}".to_vec()),
            Utc::now(),
            Box::new(NoopAcker),
        );

        assert_eq!(delivery.topic(), "saga-commands");
        assert_eq!(delivery.message().body, b"{}");
        assert!(delivery.ack().is_ok());
    }
}
