//! Dependency seams injected into broker backends.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// Backends stamp [`Delivery`](crate::broker::Delivery) timestamps through
/// this seam so tests can pin time with a fixed implementation.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
