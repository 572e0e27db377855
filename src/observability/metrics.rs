//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_active_connections` (gauge): connections currently registered
//! - `proxy_requests_total` (counter): request heads parsed with a usable target
//! - `proxy_dial_failures_total` (counter, `reason`): failed upstream dials
//! - `proxy_dial_duration_seconds` (histogram): time to establish upstream
//! - `proxy_relay_bytes_total` (counter, `direction`): bytes relayed
//!
//! Without an installed recorder every call here is a no-op.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter, serving scrapes at `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened() {
    metrics::counter!("proxy_connections_total").increment(1);
}

pub fn set_active_connections(count: usize) {
    metrics::gauge!("proxy_active_connections").set(count as f64);
}

pub fn record_request() {
    metrics::counter!("proxy_requests_total").increment(1);
}

pub fn record_dial_failure(reason: &'static str) {
    metrics::counter!("proxy_dial_failures_total", "reason" => reason).increment(1);
}

pub fn record_dial_duration(elapsed: Duration) {
    metrics::histogram!("proxy_dial_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_relay_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("proxy_relay_bytes_total", "direction" => direction).increment(bytes);
}
