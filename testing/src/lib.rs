//! # Sagaflow Testing
//!
//! Testing utilities and helpers for Sagaflow.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a full in-process [`Broker`](sagaflow_core::Broker)
//!   implementation that can drive a coordinator loop end to end
//! - Mock implementations of environment seams ([`FixedClock`])
//! - A tracing initializer for readable test output
//!
//! ## Example
//!
//! ```ignore
//! use sagaflow_testing::InMemoryBroker;
//! use std::time::Duration;
//!
//! #[tokio::test]
//! async fn order_saga_completes() {
//!     let broker = InMemoryBroker::new();
//!     let coordinator = Coordinator::new(Arc::new(broker.clone()), pool, "saga-commands");
//!     coordinator.start(options).await.unwrap();
//!
//!     coordinator.write(&SagaCommand::begin_saga("order", "saga-1", params)).await.unwrap();
//!     broker
//!         .wait_for_kind("saga-commands", CommandKind::EndSaga, Duration::from_secs(1))
//!         .await
//!         .unwrap();
//! }
//! ```

use chrono::{DateTime, Utc};
use sagaflow_core::environment::Clock;

/// In-memory broker for driving coordinator tests.
pub mod broker_mock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use sagaflow_testing::mocks::FixedClock;
    /// use sagaflow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Initialize a tracing subscriber for test output.
///
/// Honors `RUST_LOG`; defaults to `info`. Safe to call from several tests -
/// only the first initialization wins.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use broker_mock::{InMemoryBroker, WaitTimeout};
pub use mocks::{FixedClock, test_clock};
