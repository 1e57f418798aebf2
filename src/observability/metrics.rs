//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): completed requests by method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_rate_limited_total` (counter): limiter outcomes other than
//!   immediate admission (`queued`, `rejected`)
//! - `gateway_auth_rejections_total` (counter): 401/403 by reason
//! - `gateway_rate_limit_keys` (gauge): client keys currently tracked
//!
//! # Design Decisions
//! - Recording is always on; without an installed exporter the `metrics`
//!   facade drops updates
//! - The Prometheus exporter owns its own HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_rate_limited(outcome: &'static str) {
    counter!("gateway_rate_limited_total", "outcome" => outcome).increment(1);
}

pub fn record_auth_rejection(reason: &'static str) {
    counter!("gateway_auth_rejections_total", "reason" => reason).increment(1);
}

pub fn set_rate_limit_keys(keys: usize) {
    gauge!("gateway_rate_limit_keys").set(keys as f64);
}
