//! Retry logic with exponential backoff for saga step functions.
//!
//! The coordinator's own retry path is an immediate, unbounded replay: a
//! step that reports [`StepOutcome::Retry`](sagaflow_core::StepOutcome)
//! is re-dispatched through the broker with no delay and no attempt limit.
//! Any backoff or cap therefore belongs *inside* the step function, where
//! this module comes in: wrap the fallible call with
//! [`retry_with_backoff`] and only surface `Retry` once local attempts are
//! exhausted.
//!
//! # Example
//!
//! ```rust
//! use sagaflow_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let reservation = retry_with_backoff(policy, || async {
//!     // Call the inventory service here
//!     Ok::<_, String>("reservation-42")
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff with jitter:
    /// `delay = min(initial_delay * multiplier^attempt, max_delay) * (0.5 + random(0.5))`
    ///
    /// Jitter spreads simultaneous retries apart so concurrent saga
    /// instances do not hammer a recovering downstream in lockstep.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        use rand::Rng;

        // Attempts are small (bounded by max_retries), well within i32.
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(capped_secs * jitter)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub const fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_retries
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// # Arguments
///
/// * `policy` - Retry policy configuration
/// * `operation` - Async operation to retry (must be `FnMut` to allow
///   multiple calls)
///
/// # Errors
///
/// Returns the last error once `policy.max_retries` attempts are
/// exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if !policy.should_retry(attempt) {
                    tracing::warn!(attempt, %error, "retries exhausted");
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(attempt, ?delay, %error, "operation failed, backing off");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
