//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const AUTH_FAILURES_TOTAL: &str = "courier_auth_failures_total";
    pub const MESSAGES_RELAYED_TOTAL: &str = "courier_messages_relayed_total";
    pub const READ_RECEIPTS_TOTAL: &str = "courier_read_receipts_total";
    pub const TYPING_EVENTS_TOTAL: &str = "courier_typing_events_total";
    pub const EVENT_LATENCY_SECONDS: &str = "courier_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of authenticated connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of rejected connection attempts"
    );
    metrics::describe_counter!(
        names::MESSAGES_RELAYED_TOTAL,
        "Total number of relayed messages, labeled by final status"
    );
    metrics::describe_counter!(
        names::READ_RECEIPTS_TOTAL,
        "Total number of messages transitioned to read"
    );
    metrics::describe_counter!(
        names::TYPING_EVENTS_TOTAL,
        "Total number of typing / stop-typing signals relayed"
    );
    metrics::describe_histogram!(
        names::EVENT_LATENCY_SECONDS,
        "Inbound event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of contained faults");

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

/// Record a new authenticated connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a rejected connection attempt.
pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}

/// Record a relayed message and its final persisted status.
pub fn record_relayed_message(status: &str) {
    counter!(names::MESSAGES_RELAYED_TOTAL, "status" => status.to_string()).increment(1);
}

/// Record messages transitioned to read.
pub fn record_read_receipts(count: u64) {
    counter!(names::READ_RECEIPTS_TOTAL).increment(count);
}

/// Record a relayed typing signal.
pub fn record_typing_event() {
    counter!(names::TYPING_EVENTS_TOTAL).increment(1);
}

/// Record inbound event handling latency.
pub fn record_event_latency(seconds: f64) {
    histogram!(names::EVENT_LATENCY_SECONDS).record(seconds);
}

/// Record a contained fault.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
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
