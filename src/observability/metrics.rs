//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_listeners_bound` (gauge): listening handles held by the server
//! - `rpc_active_connections` (gauge): open connections per bound address
//! - `rpc_calls_dispatched_total` (counter): calls queued per service
//! - `rpc_service_queue_overflows_total` (counter): calls rejected as too busy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is optional and owned by the binary

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_listeners_bound(count: usize) {
    ::metrics::gauge!("rpc_listeners_bound").set(count as f64);
}

pub fn record_active_connections(address: &str, active: u64) {
    ::metrics::gauge!("rpc_active_connections", "address" => address.to_string()).set(active as f64);
}

pub fn record_call_dispatched(service: &str) {
    ::metrics::counter!("rpc_calls_dispatched_total", "service" => service.to_string()).increment(1);
}

pub fn record_queue_overflow(service: &str) {
    ::metrics::counter!("rpc_service_queue_overflows_total", "service" => service.to_string())
        .increment(1);
}
