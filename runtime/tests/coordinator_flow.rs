//! End-to-end coordinator tests over the in-memory broker.
//!
//! These drive the full asynchronous loop: the coordinator subscribes to
//! the saga topic, a `BeginSaga` command is written, and every subsequent
//! transition is a real publish/consume round trip.

#![allow(clippy::unwrap_used)] // Test code asserts on known-good results

use sagaflow_core::Broker;
use sagaflow_core::builder::Builder;
use sagaflow_core::command::{CommandKind, SagaCommand};
use sagaflow_core::saga::Saga;
use sagaflow_core::step::{CompensationOutcome, SagaParams, StepOutcome};
use sagaflow_runtime::{Coordinator, StartOptions, WorkerPool};
use sagaflow_testing::{InMemoryBroker, init_test_tracing};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TOPIC: &str = "saga-commands";
const WAIT: Duration = Duration::from_secs(2);

/// Per-step call counters, shared with the saga's functions.
#[derive(Clone, Default)]
struct Calls {
    counts: Arc<std::sync::Mutex<std::collections::HashMap<String, usize>>>,
}

impl Calls {
    fn bump(&self, step: &str) {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(step.to_string())
            .or_insert(0) += 1;
    }

    fn of(&self, step: &str) -> usize {
        self.counts.lock().unwrap().get(step).copied().unwrap_or(0)
    }
}

fn counted_step(calls: &Calls, name: &str) -> impl Fn(SagaParams) -> BoxedStep + use<> {
    let calls = calls.clone();
    let name = name.to_string();
    move |_params| {
        calls.bump(&name);
        Box::pin(async { StepOutcome::Completed })
    }
}

type BoxedStep = std::pin::Pin<Box<dyn Future<Output = StepOutcome> + Send>>;

async fn started_coordinator(broker: &InMemoryBroker, saga: Saga) -> Coordinator {
    init_test_tracing();
    let coordinator = Coordinator::new(Arc::new(broker.clone()), WorkerPool::new(4), TOPIC);
    coordinator
        .start(StartOptions::new().with_saga_routes(vec![saga]))
        .await
        .unwrap();
    coordinator
}

#[tokio::test]
async fn forward_happy_path_publishes_exactly_seven_coordinator_commands() {
    let broker = InMemoryBroker::new();
    let calls = Calls::default();

    let saga = Builder::new("order")
        .begin("reserve", counted_step(&calls, "reserve"))
        .no_compensation()
        .then("charge", counted_step(&calls, "charge"))
        .no_compensation()
        .then("ship", counted_step(&calls, "ship"))
        .no_compensation()
        .end();
    let coordinator = started_coordinator(&broker, saga).await;

    let params = json!({ "order_id": 42 });
    coordinator
        .write(&SagaCommand::begin_saga("order", "saga-1", params.clone()))
        .await
        .unwrap();

    let commands = broker
        .wait_for_kind(TOPIC, CommandKind::EndSaga, WAIT)
        .await
        .unwrap();

    // The initiator published BeginSaga; the coordinator answered with
    // Begin/End per step plus the terminal EndSaga: seven commands.
    let kinds: Vec<(CommandKind, &str)> = commands
        .iter()
        .map(|c| (c.kind, c.transaction_id.as_str()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (CommandKind::BeginSaga, ""),
            (CommandKind::BeginTransaction, "reserve"),
            (CommandKind::EndTransaction, "reserve"),
            (CommandKind::BeginTransaction, "charge"),
            (CommandKind::EndTransaction, "charge"),
            (CommandKind::BeginTransaction, "ship"),
            (CommandKind::EndTransaction, "ship"),
            (CommandKind::EndSaga, ""),
        ]
    );
    assert_eq!(commands.len() - 1, 7);

    // Params rode through every non-terminal hop unchanged.
    for command in &commands {
        if command.kind != CommandKind::EndSaga {
            assert_eq!(command.saga_params, params);
        }
    }
    assert_eq!(calls.of("reserve"), 1);
    assert_eq!(calls.of("charge"), 1);
    assert_eq!(calls.of("ship"), 1);
}

#[tokio::test]
async fn abort_unwinds_compensations_one_round_trip_at_a_time() {
    let broker = InMemoryBroker::new();
    let calls = Calls::default();

    let undo_a = calls.clone();
    let undo_b = calls.clone();
    let saga = Builder::new("order")
        .begin("reserve", counted_step(&calls, "reserve"))
        .with_compensation("release", move |_p| {
            undo_a.bump("release");
            Box::pin(async { CompensationOutcome::Completed }) as BoxedCompensation
        })
        .then("charge", |_p| async {
            StepOutcome::Abort("card declined".to_string())
        })
        .with_compensation("refund", move |_p| {
            undo_b.bump("refund");
            Box::pin(async { CompensationOutcome::Completed }) as BoxedCompensation
        })
        .end();
    let coordinator = started_coordinator(&broker, saga).await;

    coordinator
        .write(&SagaCommand::begin_saga("order", "saga-1", SagaParams::Null))
        .await
        .unwrap();

    let commands = broker
        .wait_for_kind(TOPIC, CommandKind::EndSaga, WAIT)
        .await
        .unwrap();

    let kinds: Vec<(CommandKind, &str, &str)> = commands
        .iter()
        .map(|c| {
            (
                c.kind,
                c.transaction_id.as_str(),
                c.compensation_id.as_str(),
            )
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            (CommandKind::BeginSaga, "", ""),
            (CommandKind::BeginTransaction, "reserve", ""),
            (CommandKind::EndTransaction, "reserve", ""),
            (CommandKind::BeginTransaction, "charge", ""),
            (CommandKind::AbortSaga, "charge", ""),
            // The unwind starts at the aborted step's own compensation...
            (CommandKind::EndTransaction, "charge", "refund"),
            (CommandKind::BeginTransaction, "refund", ""),
            (CommandKind::EndTransaction, "refund", ""),
            // ...and walks backward one hop per round trip.
            (CommandKind::BeginTransaction, "release", ""),
            (CommandKind::EndTransaction, "release", ""),
            (CommandKind::EndSaga, "", ""),
        ]
    );
    assert_eq!(calls.of("refund"), 1);
    assert_eq!(calls.of("release"), 1);
}

type BoxedCompensation = std::pin::Pin<Box<dyn Future<Output = CompensationOutcome> + Send>>;

#[tokio::test]
async fn save_point_bounds_the_unwind() {
    let broker = InMemoryBroker::new();
    let calls = Calls::default();

    let undo_a = calls.clone();
    let ship_calls = calls.clone();
    let saga = Builder::new("order")
        .begin("reserve", counted_step(&calls, "reserve"))
        .with_compensation("release", move |_p| {
            undo_a.bump("release");
            Box::pin(async { CompensationOutcome::Completed }) as BoxedCompensation
        })
        .then("charge", counted_step(&calls, "charge"))
        .save_point()
        .no_compensation()
        .then("ship", move |_p| {
            ship_calls.bump("ship");
            Box::pin(async { StepOutcome::Abort("carrier rejected".to_string()) }) as BoxedStep
        })
        .with_compensation("cancel-shipment", |_p| async {
            CompensationOutcome::Completed
        })
        .end();
    let coordinator = started_coordinator(&broker, saga).await;

    coordinator
        .write(&SagaCommand::begin_saga("order", "saga-1", SagaParams::Null))
        .await
        .unwrap();

    let commands = broker
        .wait_for_kind(TOPIC, CommandKind::EndSaga, WAIT)
        .await
        .unwrap();

    // The unwind runs the aborted step's own compensation, then stops at
    // the save point: "release" is never reached.
    let executed_compensations: Vec<&str> = commands
        .iter()
        .filter(|c| c.kind == CommandKind::BeginTransaction)
        .map(|c| c.transaction_id.as_str())
        .filter(|id| *id == "cancel-shipment" || *id == "release")
        .collect();
    assert_eq!(executed_compensations, vec!["cancel-shipment"]);
    assert_eq!(calls.of("release"), 0);
}

#[tokio::test]
async fn transient_failures_replay_the_step_until_it_succeeds() {
    let broker = InMemoryBroker::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&attempts);
    let saga = Builder::new("flaky")
        .begin("wobble", move |_p| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < 2 {
                    StepOutcome::Retry("downstream busy".to_string())
                } else {
                    StepOutcome::Completed
                }
            }) as BoxedStep
        })
        .no_compensation()
        .end();
    let coordinator = started_coordinator(&broker, saga).await;

    let params = json!({ "payload": "stable" });
    coordinator
        .write(&SagaCommand::begin_saga("flaky", "saga-1", params.clone()))
        .await
        .unwrap();

    let commands = broker
        .wait_for_kind(TOPIC, CommandKind::EndSaga, WAIT)
        .await
        .unwrap();

    // Two failed attempts, each replayed via AbortTransaction, then success.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let aborts = commands
        .iter()
        .filter(|c| c.kind == CommandKind::AbortTransaction)
        .count();
    assert_eq!(aborts, 2);

    // Every replay carried identical params.
    for command in commands
        .iter()
        .filter(|c| c.kind == CommandKind::BeginTransaction)
    {
        assert_eq!(command.saga_params, params);
        assert_eq!(command.transaction_id, "wobble");
    }
}

#[tokio::test]
async fn undecodable_messages_are_acked_and_dead_lettered() {
    let broker = InMemoryBroker::new();
    let saga = Builder::new("order")
        .begin("reserve", |_p| async { StepOutcome::Completed })
        .no_compensation()
        .end();
    let coordinator = started_coordinator(&broker, saga).await;

    broker
        .publish(
            TOPIC,
            &sagaflow_core::broker::Message::new(b"not a command".to_vec()),
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    while coordinator.dead_letters().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "dead letter missing");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Acked on receipt even though processing failed; no command came out.
    assert_eq!(broker.acked(), 1);
    let entry = coordinator.dead_letters().peek().unwrap();
    assert_eq!(entry.body, b"not a command");
    assert_eq!(broker.published_commands(TOPIC).len(), 0);
}

#[tokio::test]
async fn stop_tears_down_the_subscription() {
    let broker = InMemoryBroker::new();
    let saga = Builder::new("order")
        .begin("reserve", |_p| async { StepOutcome::Completed })
        .no_compensation()
        .end();
    let coordinator = started_coordinator(&broker, saga).await;

    // Drive one instance through to prove the loop is live.
    coordinator
        .write(&SagaCommand::begin_saga("order", "saga-1", SagaParams::Null))
        .await
        .unwrap();
    broker
        .wait_for_kind(TOPIC, CommandKind::EndSaga, WAIT)
        .await
        .unwrap();

    coordinator.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let before = broker.published_commands(TOPIC).len();
    coordinator
        .write(&SagaCommand::begin_saga("order", "saga-2", SagaParams::Null))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The write landed on the topic but no handler advanced it.
    assert_eq!(broker.published_commands(TOPIC).len(), before + 1);
}
