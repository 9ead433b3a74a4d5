//! Integration tests for [`RedpandaBroker`] with a real Kafka/Redpanda instance.
//!
//! These tests use testcontainers to spin up a real Kafka instance and
//! validate:
//! - Saga command publish/subscribe round-trip
//! - Fire-and-forget acknowledgment
//! - Per-key ordering for one saga instance
//! - Unsubscribe stopping delivery
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//! - Can be flaky due to Kafka's distributed nature and timing
//!
//! To run explicitly:
//! ```bash
//! cargo test -p sagaflow-redpanda --test integration_tests -- --ignored
//! ```
//!
//! # Panics
//!
//! These tests use `expect()` and `panic!()` for setup failures, which is
//! acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]

use sagaflow_core::broker::{Broker, Handler, Message, SubscribeOptions};
use sagaflow_core::command::SagaCommand;
use sagaflow_redpanda::RedpandaBroker;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

/// Helper to encode a saga command into a keyed broker message.
fn command_message(command: &SagaCommand) -> Message {
    Message::new(serde_json::to_vec(command).expect("command encodes"))
        .with_key(command.saga_id.as_bytes())
}

/// Helper to wait for Kafka to accept publishes.
async fn wait_for_kafka_ready(brokers: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(broker) = RedpandaBroker::builder()
            .brokers(brokers)
            .auto_offset_reset("earliest")
            .build()
        {
            let warmup = Message::new(b"warmup".to_vec());
            if broker.publish("warmup-topic", &warmup).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

/// Collects decoded saga commands delivered to a subscription.
fn collecting_handler(sink: Arc<Mutex<Vec<SagaCommand>>>) -> Handler {
    Arc::new(move |delivery| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            delivery.ack()?;
            if let Ok(command) = serde_json::from_slice::<SagaCommand>(&delivery.message().body) {
                sink.lock().unwrap().push(command);
            }
            Ok(())
        })
    })
}

async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    predicate()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn publish_subscribe_round_trip() {
    let container = Kafka::default().start().await.expect("kafka starts");
    let port = container
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("mapped port");
    let brokers = format!("127.0.0.1:{port}");
    wait_for_kafka_ready(&brokers).await;

    let broker = RedpandaBroker::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .consumer_group("round-trip")
        .build()
        .expect("broker builds");

    let received = Arc::new(Mutex::new(Vec::new()));
    let _subscriber = broker
        .subscribe(
            "saga-commands",
            collecting_handler(Arc::clone(&received)),
            SubscribeOptions::new(),
        )
        .await
        .expect("subscribes");

    let command = SagaCommand::begin_saga("order", "saga-1", json!({ "order_id": 42 }));
    broker
        .publish("saga-commands", &command_message(&command))
        .await
        .expect("publishes");

    let delivered = wait_until(
        || !received.lock().unwrap().is_empty(),
        Duration::from_secs(30),
    )
    .await;
    assert!(delivered, "command was not delivered");
    assert_eq!(received.lock().unwrap()[0], command);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn same_saga_id_preserves_order() {
    let container = Kafka::default().start().await.expect("kafka starts");
    let port = container
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("mapped port");
    let brokers = format!("127.0.0.1:{port}");
    wait_for_kafka_ready(&brokers).await;

    let broker = RedpandaBroker::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .consumer_group("ordering")
        .build()
        .expect("broker builds");

    let received = Arc::new(Mutex::new(Vec::new()));
    let _subscriber = broker
        .subscribe(
            "saga-ordering",
            collecting_handler(Arc::clone(&received)),
            SubscribeOptions::new(),
        )
        .await
        .expect("subscribes");

    // All commands share one saga id, hence one partition, hence order.
    for n in 0..10 {
        let command =
            SagaCommand::begin_transaction("order", "saga-1", format!("step-{n}"), json!(n));
        broker
            .publish("saga-ordering", &command_message(&command))
            .await
            .expect("publishes");
    }

    let delivered = wait_until(
        || received.lock().unwrap().len() == 10,
        Duration::from_secs(30),
    )
    .await;
    assert!(delivered, "not all commands were delivered");

    let steps: Vec<String> = received
        .lock()
        .unwrap()
        .iter()
        .map(|c| c.transaction_id.clone())
        .collect();
    let expected: Vec<String> = (0..10).map(|n| format!("step-{n}")).collect();
    assert_eq!(steps, expected);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unsubscribe_stops_delivery() {
    let container = Kafka::default().start().await.expect("kafka starts");
    let port = container
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("mapped port");
    let brokers = format!("127.0.0.1:{port}");
    wait_for_kafka_ready(&brokers).await;

    let broker = RedpandaBroker::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .consumer_group("unsubscribe")
        .build()
        .expect("broker builds");

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscriber = broker
        .subscribe(
            "saga-stop",
            collecting_handler(Arc::clone(&received)),
            SubscribeOptions::new(),
        )
        .await
        .expect("subscribes");

    let first = SagaCommand::begin_saga("order", "saga-1", json!(null));
    broker
        .publish("saga-stop", &command_message(&first))
        .await
        .expect("publishes");
    let delivered = wait_until(
        || !received.lock().unwrap().is_empty(),
        Duration::from_secs(30),
    )
    .await;
    assert!(delivered, "first command was not delivered");

    subscriber.unsubscribe().expect("unsubscribes");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let second = SagaCommand::begin_saga("order", "saga-2", json!(null));
    broker
        .publish("saga-stop", &command_message(&second))
        .await
        .expect("publishes");
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(received.lock().unwrap().len(), 1);
}
