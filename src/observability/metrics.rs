//! Process-level metrics exposition.
//!
//! The per-service JSON metrics API reads its own counters; this module
//! feeds the Prometheus exporter for fleet dashboards.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize metrics exporter and server.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!("metrics server listening on http://{}", addr);
}

/// Record a completed proxy request.
pub fn record_request(service: &str, backend: &str, method: &str, status: u16, start: Instant) {
    let labels = [
        ("service", service.to_string()),
        ("backend", backend.to_string()),
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];

    counter!("lb_requests_total", &labels).increment(1);
    histogram!("lb_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

/// Record a retry attempt.
pub fn record_retry(service: &str) {
    counter!("lb_retries_total", "service" => service.to_string()).increment(1);
}

/// Update a backend health gauge.
pub fn record_backend_health(service: &str, backend: &str, healthy: bool) {
    let val = if healthy { 1.0 } else { 0.0 };
    gauge!(
        "lb_backend_healthy",
        "service" => service.to_string(),
        "backend" => backend.to_string()
    )
    .set(val);
}

/// Record an admin request rejected by the rate limiter.
pub fn record_rate_limited() {
    counter!("lb_admin_rate_limited_total").increment(1);
}
