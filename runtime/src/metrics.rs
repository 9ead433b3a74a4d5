//! Prometheus metrics for observability and monitoring.
//!
//! The coordinator is headless: there is no synchronous caller waiting on a
//! saga, so metric and log traffic is how operators see saga health. This
//! module registers descriptions for every metric the runtime emits and
//! exposes them through a Prometheus scrape endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use sagaflow_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Install the recorder; scrape via `server.render()`
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the Prometheus recorder and keeps the handle for rendering
/// metrics on a scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metric descriptions and install the recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics exporter cannot be built or
    /// installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the
    /// re-initialization is skipped with a warning. In production, ensure
    /// this is only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            // Buckets tuned for step execution latency: business calls
            // range from sub-millisecond mocks to multi-second services.
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "metrics recorder installed - render via MetricsServer::render"
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("metrics recorder already initialized, skipping");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Coordinator metrics
    describe_counter!(
        "saga_commands_processed_total",
        "Total number of saga commands processed, labeled by command kind"
    );
    describe_counter!(
        "saga_commands_published_total",
        "Total number of saga commands published, labeled by command kind"
    );
    describe_counter!(
        "saga_commands_invalid_total",
        "Total number of inbound messages that failed to decode"
    );
    describe_counter!(
        "saga_step_retries_total",
        "Total number of step failures that scheduled a retry replay"
    );
    describe_counter!(
        "saga_aborted_total",
        "Total number of steps that aborted their saga"
    );
    describe_counter!(
        "saga_finished_total",
        "Total number of saga instances that reached EndSaga"
    );
    describe_histogram!(
        "saga_step_duration_seconds",
        "Time taken to execute one transaction or compensation"
    );

    // Dead letter queue metrics
    describe_gauge!(
        "saga_dead_letters",
        "Current number of commands in the dead letter queue"
    );
    describe_counter!(
        "saga_dead_letters_total",
        "Total number of commands pushed to the dead letter queue"
    );
    describe_counter!(
        "saga_dead_letters_dropped_total",
        "Total number of dead letters dropped because the queue was full"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_and_renders() {
        let mut server = MetricsServer::new(([127, 0, 0, 1], 0).into());
        // May be Ok or skip if another test installed the recorder first;
        // either way start must not error.
        assert!(server.start().is_ok());
    }
}
