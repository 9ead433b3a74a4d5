//! The Saga Execution Coordinator.
//!
//! The coordinator subscribes to a single command topic, decodes each
//! inbound [`SagaCommand`], looks up the named [`Saga`] definition, and
//! advances that instance's state machine by writing the next command back
//! onto the same topic. States are implicit in the command kind; because
//! each message fully encodes the instance's position, the coordinator
//! keeps no per-instance state at all.
//!
//! # Transitions
//!
//! | incoming | outgoing |
//! |---|---|
//! | `BeginSaga` | `BeginTransaction(first)`, or `EndSaga` for an empty saga |
//! | `BeginTransaction` | execute the step: `Completed` → `EndTransaction`; `Retry` → `AbortTransaction`; `Abort` → `AbortSaga` |
//! | `AbortTransaction` | `BeginTransaction(same step)` - the retry replay |
//! | `AbortSaga` | `EndTransaction` carrying the step's compensation, or `EndSaga` when there is nothing to unwind |
//! | `EndTransaction` | `BeginTransaction(next hop)` - the compensation id when unwinding, the forward pointer otherwise - or `EndSaga` when the chain ends |
//! | `EndSaga` | none (terminal) |
//!
//! Retries are unbounded at this layer; backoff and attempt limits belong
//! inside the step function (see [`retry`](crate::retry)) or to broker
//! redelivery policy. An N-step rollback costs N message round trips, each
//! independently crash-recoverable.
//!
//! # Delivery semantics
//!
//! Every inbound message is acknowledged immediately on receipt, before
//! processing, and then handed to the bounded [`WorkerPool`]. Broker
//! consumption therefore never stalls on a slow step, but a command that
//! fails to decode or process will not be redelivered - it is logged and
//! captured in the [`DeadLetterQueue`](crate::DeadLetterQueue).

use crate::error::CoordinatorError;
use crate::worker_pool::WorkerPool;
use crate::{DeadLetterQueue, HealthCheck};
use metrics::{counter, histogram};
use sagaflow_core::broker::{Broker, Delivery, Handler, Message, SubscribeOptions};
use sagaflow_core::command::{CommandKind, SagaCommand};
use sagaflow_core::saga::Saga;
use sagaflow_core::step::StepOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, watch};

/// Configuration for [`Coordinator::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    subscribe_options: SubscribeOptions,
    saga_routes: Vec<Saga>,
}

impl StartOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker-specific subscription tuning for the saga topic.
    #[must_use]
    pub fn with_subscribe_options(mut self, options: SubscribeOptions) -> Self {
        self.subscribe_options = options;
        self
    }

    /// The saga definitions this coordinator instance serves. At least one
    /// route is required.
    #[must_use]
    pub fn with_saga_routes(mut self, routes: Vec<Saga>) -> Self {
        self.saga_routes = routes;
        self
    }
}

/// The saga execution coordinator.
///
/// Cheap to clone; clones share the broker, registry, worker pool and dead
/// letter queue, so a clone can be captured by the subscription handler
/// while the original keeps serving [`write`](Self::write) calls.
#[derive(Clone)]
pub struct Coordinator {
    broker: Arc<dyn Broker>,
    topic: String,
    sagas: Arc<RwLock<HashMap<String, Arc<Saga>>>>,
    pool: WorkerPool,
    dead_letters: DeadLetterQueue,
    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    /// Create a coordinator over the given broker, worker pool and saga
    /// topic. No subscription exists until [`start`](Self::start).
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, pool: WorkerPool, topic: impl Into<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            broker,
            topic: topic.into(),
            sagas: Arc::new(RwLock::new(HashMap::new())),
            pool,
            dead_letters: DeadLetterQueue::default(),
            shutdown,
        }
    }

    /// The saga command topic this coordinator serves.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Handle to the dead letter queue for inspection and draining.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue {
        self.dead_letters.clone()
    }

    /// Add a saga definition to the registry.
    pub async fn register_saga(&self, saga: Saga) {
        tracing::debug!(saga = %saga.name(), steps = saga.len(), "registered saga route");
        self.sagas
            .write()
            .await
            .insert(saga.name().to_string(), Arc::new(saga));
    }

    /// Register the configured routes and subscribe to the saga topic.
    ///
    /// Each inbound delivery is acknowledged immediately, then decoding and
    /// processing run on the worker pool. A background task watches the
    /// shutdown signal and tears the subscription down.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::NoSagaRoutes`] when `options` carries no
    ///   routes.
    /// - [`CoordinatorError::Subscribe`] when the broker subscription
    ///   fails.
    pub async fn start(&self, options: StartOptions) -> Result<(), CoordinatorError> {
        if options.saga_routes.is_empty() {
            tracing::error!("no saga route for handler");
            return Err(CoordinatorError::NoSagaRoutes);
        }
        for saga in options.saga_routes {
            self.register_saga(saga).await;
        }

        let handler_coordinator = self.clone();
        let handler: Handler = Arc::new(move |delivery: Delivery| {
            let coordinator = handler_coordinator.clone();
            Box::pin(async move {
                // Ack first: consumption must not depend on processing.
                delivery.ack()?;

                let topic = delivery.topic().to_string();
                let body = delivery.message().body.clone();
                let worker = coordinator.clone();
                coordinator
                    .pool
                    .submit(async move {
                        worker.handle_message(&topic, body).await;
                    })
                    .await;
                Ok(())
            })
        });

        let subscriber = self
            .broker
            .subscribe(&self.topic, handler, options.subscribe_options)
            .await
            .map_err(|error| {
                tracing::error!(topic = %self.topic, %error, "failed to consume saga topic");
                CoordinatorError::Subscribe(error)
            })?;

        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            if let Err(error) = subscriber.unsubscribe() {
                tracing::warn!(%error, "failed to unsubscribe saga topic handler");
            }
        });

        let registered = self.sagas.read().await.len();
        tracing::info!(
            topic = %self.topic,
            sagas = registered,
            workers = self.pool.capacity(),
            "saga coordinator started"
        );
        Ok(())
    }

    /// Signal shutdown.
    ///
    /// The subscription is torn down by the background watcher; worker pool
    /// tasks already in flight run to completion.
    pub fn stop(&self) {
        tracing::info!(topic = %self.topic, "stopping saga coordinator");
        let _ = self.shutdown.send(true);
    }

    /// Current health of this coordinator instance.
    pub async fn health(&self) -> HealthCheck {
        let registered = self.sagas.read().await.len();
        let dead_letters = self.dead_letters.len();

        let check = if registered == 0 {
            HealthCheck::unhealthy("saga-coordinator", "no saga routes registered")
        } else if dead_letters >= self.dead_letters.max_size() {
            HealthCheck::unhealthy("saga-coordinator", "dead letter queue is full")
        } else if dead_letters > 0 {
            HealthCheck::degraded(
                "saga-coordinator",
                format!("{dead_letters} commands in dead letter queue"),
            )
        } else {
            HealthCheck::healthy("saga-coordinator")
        };

        check
            .with_metadata("topic", self.topic.clone())
            .with_metadata("registered_sagas", registered.to_string())
            .with_metadata("dead_letters", dead_letters.to_string())
    }

    /// Decode one raw message body and process it, capturing failures in
    /// the dead letter queue. Runs on the worker pool.
    async fn handle_message(&self, topic: &str, body: Vec<u8>) {
        if body.is_empty() {
            tracing::error!(topic, "empty message body");
            self.dead_letters
                .push(body, "empty message body".to_string());
            return;
        }

        let command = match serde_json::from_slice::<SagaCommand>(&body) {
            Ok(command) => command,
            Err(error) => {
                counter!("saga_commands_invalid_total").increment(1);
                tracing::error!(topic, %error, "cannot decode saga command");
                self.dead_letters.push(body, error.to_string());
                return;
            }
        };

        if let Err(error) = self.process_command(&command).await {
            tracing::error!(
                saga = %command.saga_name,
                saga_id = %command.saga_id,
                kind = %command.kind,
                %error,
                "failed to handle saga command"
            );
            self.dead_letters.push(body, error.to_string());
        }
    }

    /// Advance the state machine one transition for the given command.
    ///
    /// Pure decision logic over the read-only registry; the only blocking
    /// calls are executing the named step and publishing the next command.
    /// Safe to run concurrently for different saga instances.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::UnknownSaga`] when the command's saga is not
    ///   registered; nothing is published.
    /// - [`CoordinatorError::UnknownStep`] when the command names a step
    ///   its saga does not define.
    /// - [`CoordinatorError::Marshal`] / [`CoordinatorError::Publish`] when
    ///   writing the next command fails.
    pub async fn process_command(&self, command: &SagaCommand) -> Result<(), CoordinatorError> {
        counter!("saga_commands_processed_total", "kind" => command.kind.as_str()).increment(1);

        let saga = self
            .sagas
            .read()
            .await
            .get(&command.saga_name)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownSaga(command.saga_name.clone()))?;

        match command.kind {
            CommandKind::BeginSaga => match saga.first_transaction() {
                None => self.finish_saga(command).await,
                Some(first) => {
                    self.write(&SagaCommand::begin_transaction(
                        &command.saga_name,
                        &command.saga_id,
                        first,
                        command.saga_params.clone(),
                    ))
                    .await
                }
            },
            CommandKind::BeginTransaction => self.execute_step(&saga, command).await,
            CommandKind::AbortTransaction => {
                // The retry replay: re-dispatch the same step unchanged.
                self.write(&SagaCommand::begin_transaction(
                    &command.saga_name,
                    &command.saga_id,
                    &command.transaction_id,
                    command.saga_params.clone(),
                ))
                .await
            }
            CommandKind::AbortSaga => match saga.compensation(&command.transaction_id) {
                Some(compensation) => {
                    self.write(&SagaCommand::end_transaction_compensate(
                        &command.saga_name,
                        &command.saga_id,
                        &command.transaction_id,
                        compensation,
                        command.saga_params.clone(),
                    ))
                    .await
                }
                // Nothing reversible before the aborted step.
                None => self.finish_saga(command).await,
            },
            CommandKind::EndTransaction => {
                let next = if command.compensation_id.is_empty() {
                    saga.next(&command.transaction_id)
                } else {
                    Some(command.compensation_id.as_str())
                };
                match next {
                    None => self.finish_saga(command).await,
                    Some(next) => {
                        self.write(&SagaCommand::begin_transaction(
                            &command.saga_name,
                            &command.saga_id,
                            next,
                            command.saga_params.clone(),
                        ))
                        .await
                    }
                }
            }
            CommandKind::EndSaga => {
                counter!("saga_finished_total").increment(1);
                tracing::info!(
                    saga = %command.saga_name,
                    saga_id = %command.saga_id,
                    "saga finished"
                );
                Ok(())
            }
        }
    }

    /// Execute the step a `BeginTransaction` names and publish the command
    /// its outcome maps to.
    async fn execute_step(
        &self,
        saga: &Saga,
        command: &SagaCommand,
    ) -> Result<(), CoordinatorError> {
        let started = Instant::now();
        let outcome = saga
            .execute(&command.transaction_id, &command.saga_params)
            .await?;
        histogram!("saga_step_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            StepOutcome::Completed => {
                self.write(&SagaCommand::end_transaction(
                    &command.saga_name,
                    &command.saga_id,
                    &command.transaction_id,
                    command.saga_params.clone(),
                ))
                .await
            }
            StepOutcome::Retry(reason) => {
                counter!("saga_step_retries_total").increment(1);
                tracing::warn!(
                    saga = %command.saga_name,
                    saga_id = %command.saga_id,
                    step = %command.transaction_id,
                    %reason,
                    "saga step failed, scheduling retry"
                );
                self.write(&SagaCommand::abort_transaction(
                    &command.saga_name,
                    &command.saga_id,
                    &command.transaction_id,
                    command.saga_params.clone(),
                ))
                .await
            }
            StepOutcome::Abort(reason) => {
                counter!("saga_aborted_total").increment(1);
                tracing::warn!(
                    saga = %command.saga_name,
                    saga_id = %command.saga_id,
                    step = %command.transaction_id,
                    %reason,
                    "saga step aborted, unwinding to save point"
                );
                self.write(&SagaCommand::abort_saga(
                    &command.saga_name,
                    &command.saga_id,
                    &command.transaction_id,
                    command.saga_params.clone(),
                ))
                .await
            }
        }
    }

    /// Publish the terminal command for this instance.
    async fn finish_saga(&self, command: &SagaCommand) -> Result<(), CoordinatorError> {
        self.write(&SagaCommand::end_saga(&command.saga_name, &command.saga_id))
            .await
    }

    /// Marshal a command and publish it to the saga topic, keyed by the
    /// saga instance id so key-aware brokers serialize one instance's
    /// traffic.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Marshal`] or
    /// [`CoordinatorError::Publish`]; neither is retried at this layer.
    pub async fn write(&self, command: &SagaCommand) -> Result<(), CoordinatorError> {
        let body = serde_json::to_vec(command).map_err(|error| {
            tracing::error!(%error, "failed command marshalling");
            CoordinatorError::Marshal(error)
        })?;
        let message = Message::new(body).with_key(command.saga_id.as_bytes());

        self.broker
            .publish(&self.topic, &message)
            .await
            .map_err(|error| {
                tracing::error!(%error, "produce saga command failed");
                CoordinatorError::Publish(error)
            })?;

        counter!("saga_commands_published_total", "kind" => command.kind.as_str()).increment(1);
        tracing::debug!(
            saga = %command.saga_name,
            saga_id = %command.saga_id,
            kind = %command.kind,
            step = %command.transaction_id,
            "published saga command"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("topic", &self.topic)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
