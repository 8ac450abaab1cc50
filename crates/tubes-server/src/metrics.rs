//! Metrics collection and export for Tubes.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tubes_core::{Router, RouterStats};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tubes_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tubes_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "tubes_connections_rejected_total";
    pub const MESSAGES_TOTAL: &str = "tubes_messages_total";
    pub const MESSAGES_BYTES: &str = "tubes_messages_bytes";
    pub const CONTEXTS_ACTIVE: &str = "tubes_contexts_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "tubes_subscriptions_active";
    pub const ERRORS_TOTAL: &str = "tubes_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused because the server was full"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_gauge!(
        names::CONTEXTS_ACTIVE,
        "Current number of live subscription contexts"
    );
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of channel subscriptions"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of routing errors by kind");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a refused connection.
pub fn record_rejection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a routing error by its kind.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Publish a router statistics sample.
pub fn record_stats(stats: &RouterStats) {
    gauge!(names::CONTEXTS_ACTIVE).set(stats.context_count as f64);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(stats.total_subscriptions as f64);
}

/// Periodically sample router statistics into gauges.
pub fn spawn_stats_sampler(router: Arc<Router>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            record_stats(&router.stats());
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; recording must not panic
        let _guard = ConnectionMetricsGuard::new();
        record_error("unknown_channel");
        record_message(42, "broadcast");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_sampler_runs() {
        let router = Arc::new(Router::new());
        let handle = spawn_stats_sampler(router, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
