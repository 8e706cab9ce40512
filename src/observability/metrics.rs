//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, throttling, upstream outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-upstream circuit state
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, upstream
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): requests rejected by the limiter
//! - `gateway_rate_limit_buckets` (gauge): tracked client buckets
//! - `gateway_upstream_attempts_total` (counter): attempts by upstream, outcome
//! - `gateway_upstream_retries_total` (counter): retries by upstream
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until a recorder is installed, so
//!   library code and tests record unconditionally

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, upstream: &str, elapsed: Duration) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "upstream" => upstream.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_rate_limited() {
    metrics::counter!("gateway_rate_limited_total").increment(1);
}

pub fn record_bucket_count(count: usize) {
    metrics::gauge!("gateway_rate_limit_buckets").set(count as f64);
}

pub fn record_upstream_attempt(upstream: &str, outcome: &'static str) {
    metrics::counter!(
        "gateway_upstream_attempts_total",
        "upstream" => upstream.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retry(upstream: &str) {
    metrics::counter!("gateway_upstream_retries_total", "upstream" => upstream.to_string()).increment(1);
}

pub fn record_circuit_state(upstream: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!("gateway_circuit_state", "upstream" => upstream.to_string()).set(value);
}
