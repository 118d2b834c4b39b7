//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cloak_requests_total` (counter): relayed requests by method, status
//! - `cloak_request_duration_seconds` (histogram): latency distribution
//! - `cloak_sessions_total` (counter): sessions opened
//! - `cloak_session_aborts_total` (counter): aborts by reason
//! - `cloak_pattern_cache_misses_total` (counter): pattern rebuilds
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are low-cardinality (method, status, error kind)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "cloak_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("cloak_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_session_started() {
    counter!("cloak_sessions_total").increment(1);
}

pub fn record_abort(reason: &'static str) {
    counter!("cloak_session_aborts_total", "reason" => reason).increment(1);
}

pub fn record_pattern_cache_miss() {
    counter!("cloak_pattern_cache_misses_total").increment(1);
}
