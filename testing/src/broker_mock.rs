//! In-memory broker for fast, deterministic saga tests.
//!
//! [`InMemoryBroker`] implements the [`Broker`] trait entirely in process:
//! publishes are recorded per topic and fanned out to subscribed handlers
//! on spawned tasks, which is enough to drive a full coordinator loop -
//! publish a `BeginSaga`, watch the instance run itself to `EndSaga`.
//!
//! Knobs for failure-path tests:
//! - [`set_fail_publish`](InMemoryBroker::set_fail_publish) makes every
//!   publish fail, for exercising write error handling.
//! - [`acked`](InMemoryBroker::acked) counts acknowledgments, for asserting
//!   the ack-before-processing contract.
//! - an injected [`Clock`] pins delivery timestamps.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use futures::future::BoxFuture;
use sagaflow_core::broker::{
    Acker, Broker, BrokerError, Delivery, Handler, Message, SubscribeOptions, Subscriber,
};
use sagaflow_core::command::{CommandKind, SagaCommand};
use sagaflow_core::environment::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Waiting for published traffic timed out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out waiting for saga traffic on topic '{topic}'")]
pub struct WaitTimeout {
    /// The topic that was being watched.
    pub topic: String,
}

struct Subscription {
    topic: String,
    handler: Handler,
    active: Arc<AtomicBool>,
}

struct Inner {
    clock: Box<dyn Clock>,
    published: Mutex<HashMap<String, Vec<Message>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    acked: AtomicUsize,
    fail_publish: AtomicBool,
}

/// In-memory [`Broker`] implementation.
///
/// Cheap to clone; clones share the same topics, logs and subscriptions.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Create an empty broker stamping deliveries with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create an empty broker stamping deliveries with the given clock.
    #[must_use]
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock: Box::new(clock),
                published: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(Vec::new()),
                acked: AtomicUsize::new(0),
                fail_publish: AtomicBool::new(false),
            }),
        }
    }

    /// Make every subsequent publish fail, for error-path tests.
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of deliveries acknowledged so far.
    #[must_use]
    pub fn acked(&self) -> usize {
        self.inner.acked.load(Ordering::SeqCst)
    }

    /// Clear all recorded messages (for test isolation). Subscriptions
    /// stay active.
    pub fn clear(&self) {
        self.inner.published.lock().unwrap().clear();
    }

    /// All messages published to a topic, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Message> {
        self.inner
            .published
            .lock()
            .unwrap()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// All messages published to a topic, decoded as saga commands.
    ///
    /// Bodies that are not valid commands are skipped.
    #[must_use]
    pub fn published_commands(&self, topic: &str) -> Vec<SagaCommand> {
        self.published(topic)
            .iter()
            .filter_map(|message| serde_json::from_slice(&message.body).ok())
            .collect()
    }

    /// Wait until the published commands on `topic` satisfy `predicate`,
    /// polling until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] when the predicate never held.
    pub async fn wait_until<F>(
        &self,
        topic: &str,
        timeout: Duration,
        predicate: F,
    ) -> Result<Vec<SagaCommand>, WaitTimeout>
    where
        F: Fn(&[SagaCommand]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let commands = self.published_commands(topic);
            if predicate(&commands) {
                return Ok(commands);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WaitTimeout {
                    topic: topic.to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until a command of the given kind has been published to
    /// `topic`, then return everything published so far.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] when no such command appears in time.
    pub async fn wait_for_kind(
        &self,
        topic: &str,
        kind: CommandKind,
        timeout: Duration,
    ) -> Result<Vec<SagaCommand>, WaitTimeout> {
        self.wait_until(topic, timeout, |commands| {
            commands.iter().any(|command| command.kind == kind)
        })
        .await
    }

    fn dispatch(&self, topic: &str, message: &Message) {
        let subscriptions = self.inner.subscriptions.lock().unwrap();
        for subscription in subscriptions.iter() {
            if subscription.topic != topic || !subscription.active.load(Ordering::SeqCst) {
                continue;
            }

            let delivery = Delivery::new(
                topic,
                message.clone(),
                self.inner.clock.now(),
                Box::new(CountingAcker {
                    inner: Arc::clone(&self.inner),
                }),
            );
            let handler = Arc::clone(&subscription.handler);
            tokio::spawn(async move {
                if let Err(error) = handler(delivery).await {
                    tracing::error!(%error, "in-memory broker handler failed");
                }
            });
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("acked", &self.acked())
            .finish_non_exhaustive()
    }
}

struct CountingAcker {
    inner: Arc<Inner>,
}

impl Acker for CountingAcker {
    fn ack(&self) -> Result<(), BrokerError> {
        self.inner.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct InMemorySubscriber {
    topic: String,
    active: Arc<AtomicBool>,
}

impl Subscriber for InMemorySubscriber {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Broker for InMemoryBroker {
    fn publish(
        &self,
        topic: &str,
        message: &Message,
    ) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        let message = message.clone();
        Box::pin(async move {
            if self.inner.fail_publish.load(Ordering::SeqCst) {
                return Err(BrokerError::PublishFailed {
                    topic,
                    reason: "publish failure injected".to_string(),
                });
            }

            self.inner
                .published
                .lock()
                .unwrap()
                .entry(topic.clone())
                .or_default()
                .push(message.clone());

            self.dispatch(&topic, &message);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        _options: SubscribeOptions,
    ) -> BoxFuture<'_, Result<Box<dyn Subscriber>, BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let active = Arc::new(AtomicBool::new(true));
            self.inner.subscriptions.lock().unwrap().push(Subscription {
                topic: topic.clone(),
                handler,
                active: Arc::clone(&active),
            });

            Ok(Box::new(InMemorySubscriber { topic, active }) as Box<dyn Subscriber>)
        })
    }
}
