//! Redpanda broker backend for Sagaflow.
//!
//! This crate provides a production-ready, Kafka-compatible implementation
//! of the [`Broker`] trait from `sagaflow-core`, built on rdkafka. It is
//! the transport the saga coordinator runs over in production: saga
//! commands are published keyed by saga instance id, so Kafka's per-key
//! partitioning serializes all traffic for one instance while different
//! instances spread across partitions.
//!
//! # Why Redpanda?
//!
//! - **Kafka-compatible**: standard Kafka protocol, works with any
//!   Kafka-compatible system (Apache Kafka, AWS MSK, Azure Event Hubs...)
//! - **Vendor swappable**: the coordinator only sees the [`Broker`] trait
//! - **Simpler operations**: easier to deploy and operate than Kafka
//!
//! # Delivery Semantics
//!
//! **At-least-once** with stored offsets:
//! - Acknowledging a [`Delivery`] stores its offset
//!   (`enable.auto.offset.store = false`); the client commits stored
//!   offsets in the background (`enable.auto.commit = true`), so
//!   [`Delivery::ack`] is cheap and fire-and-forget.
//! - A crash between ack and commit redelivers; saga compensations must be
//!   idempotent anyway.
//! - Ordering is guaranteed within a partition, i.e. per saga instance id.
//!
//! # Example
//!
//! ```no_run
//! use sagaflow_redpanda::RedpandaBroker;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .consumer_group("saga-coordinator")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message as KafkaMessage, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use sagaflow_core::broker::{
    Acker, Broker, BrokerError, Delivery, Handler, Message, SubscribeOptions, Subscriber,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Redpanda broker implementation.
///
/// # Configuration
///
/// - **Broker addresses**: bootstrap servers (required)
/// - **Producer settings**: acks, compression, send timeout
/// - **Consumer group**: explicit id or generated from the topic
/// - **Buffer size**: deliveries buffered between consumer and handler
///   (default: 1000)
/// - **Offset reset**: where new groups start reading (default: "latest")
///
/// Per-subscription [`SubscribeOptions`] override the corresponding
/// builder settings.
pub struct RedpandaBroker {
    /// Kafka producer for publishing commands
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer send timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Delivery buffer size for subscriptions
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaBroker {
    /// Create a broker with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be
    /// created from the given addresses.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the broker.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is generated from the subscribed topic.
    /// Setting an explicit group lets several coordinator instances share
    /// the saga topic's workload.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the delivery buffer size for subscriptions.
    ///
    /// Controls how many deliveries may sit between the Kafka consumer and
    /// the handler; a full buffer back-pressures the consumer.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set the auto offset reset policy for new consumer groups:
    /// "earliest", "latest" or "error".
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            BrokerError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "RedpandaBroker created successfully"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
        })
    }
}

/// Acker that stores the delivery's offset for background commit.
struct KafkaAcker {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
    offset: i64,
}

impl Acker for KafkaAcker {
    fn ack(&self) -> Result<(), BrokerError> {
        self.consumer
            .store_offset(&self.topic, self.partition, self.offset)
            .map_err(|e| BrokerError::AckFailed(e.to_string()))
    }
}

/// Subscription handle; unsubscribing (or dropping the handle) stops the
/// consumer task.
struct RedpandaSubscriber {
    topic: String,
    shutdown: watch::Sender<bool>,
}

impl Subscriber for RedpandaSubscriber {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.shutdown
            .send(true)
            .map_err(|_| BrokerError::Other("consumer task already stopped".to_string()))
    }
}

impl Broker for RedpandaBroker {
    fn publish(&self, topic: &str, message: &Message) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let mut record: FutureRecord<'_, Vec<u8>, Vec<u8>> =
                FutureRecord::to(&topic).payload(&message.body);
            if !message.key.is_empty() {
                record = record.key(&message.key);
            }
            if !message.headers.is_empty() {
                let mut headers = OwnedHeaders::new();
                for (name, value) in &message.headers {
                    headers = headers.insert(Header {
                        key: name,
                        value: Some(value),
                    });
                }
                record = record.headers(headers);
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        key = %String::from_utf8_lossy(&message.key),
                        "saga command published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "failed to publish saga command"
                    );
                    Err(BrokerError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> BoxFuture<'_, Result<Box<dyn Subscriber>, BrokerError>> {
        let topic = topic.to_string();
        let brokers = self.brokers.clone();
        let group = options
            .consumer_group()
            .map(str::to_string)
            .or_else(|| self.consumer_group.clone())
            .unwrap_or_else(|| format!("sagaflow-{topic}"));
        let offset_reset = options
            .auto_offset_reset()
            .map(str::to_string)
            .unwrap_or_else(|| self.auto_offset_reset.clone());
        let buffer_size = options.buffer_size().unwrap_or(self.buffer_size);

        Box::pin(async move {
            // Stored offsets are committed in the background; storing is
            // what Delivery::ack does, so acking stays fire-and-forget.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "true")
                .set("enable.auto.offset.store", "false")
                .set("auto.offset.reset", &offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to subscribe to topic: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %group,
                buffer_size,
                auto_offset_reset = %offset_reset,
                "subscribed to saga topic"
            );

            let consumer = Arc::new(consumer);
            let (shutdown, mut shutdown_rx) = watch::channel(false);
            let (tx, mut rx) = mpsc::channel::<Delivery>(buffer_size);

            // Consumer task: owns the Kafka stream and forwards deliveries
            // into the bounded channel; a full channel back-pressures it.
            let stream_consumer = Arc::clone(&consumer);
            let stream_topic = topic.clone();
            tokio::spawn(async move {
                let mut stream = stream_consumer.stream();
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        next = stream.next() => {
                            match next {
                                Some(Ok(kafka_message)) => {
                                    let delivery = to_delivery(
                                        &stream_topic,
                                        &kafka_message,
                                        &stream_consumer,
                                    );
                                    if tx.send(delivery).await.is_err() {
                                        tracing::debug!("delivery channel closed, stopping consumer");
                                        break;
                                    }
                                }
                                Some(Err(e)) => {
                                    tracing::error!(
                                        topic = %stream_topic,
                                        error = %e,
                                        "failed to receive message"
                                    );
                                }
                                None => break,
                            }
                        }
                    }
                }
                tracing::debug!(topic = %stream_topic, "consumer task exiting");
            });

            // Dispatch task: invokes the handler one delivery at a time,
            // preserving partition order as seen by the handler.
            let dispatch_topic = topic.clone();
            tokio::spawn(async move {
                while let Some(delivery) = rx.recv().await {
                    if let Err(error) = handler(delivery).await {
                        tracing::error!(
                            topic = %dispatch_topic,
                            %error,
                            "saga topic handler failed"
                        );
                    }
                }
                tracing::debug!(topic = %dispatch_topic, "dispatch task exiting");
            });

            Ok(Box::new(RedpandaSubscriber { topic, shutdown }) as Box<dyn Subscriber>)
        })
    }
}

/// Convert one Kafka message into a broker [`Delivery`].
fn to_delivery(
    topic: &str,
    kafka_message: &rdkafka::message::BorrowedMessage<'_>,
    consumer: &Arc<StreamConsumer>,
) -> Delivery {
    let mut message = Message::new(kafka_message.payload().unwrap_or_default().to_vec())
        .with_key(kafka_message.key().unwrap_or_default().to_vec());
    if let Some(headers) = kafka_message.headers() {
        for header in headers.iter() {
            if let Some(value) = header.value {
                message = message.with_header(
                    header.key.to_string(),
                    String::from_utf8_lossy(value).to_string(),
                );
            }
        }
    }

    let timestamp = kafka_message
        .timestamp()
        .to_millis()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(Utc::now);

    Delivery::new(
        topic,
        message,
        timestamp,
        Box::new(KafkaAcker {
            consumer: Arc::clone(consumer),
            topic: kafka_message.topic().to_string(),
            partition: kafka_message.partition(),
            offset: kafka_message.offset(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBroker>();
        assert_sync::<RedpandaBroker>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = RedpandaBroker::builder().build();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }

    #[test]
    fn builder_default_works() {
        let _builder = RedpandaBroker::builder();
    }
}
