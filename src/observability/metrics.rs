//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): forwarded exchanges by service, status
//! - `gateway_request_duration_seconds` (histogram): head-to-head latency
//! - `gateway_active_pairs` (gauge): registered accept/connect pairs
//! - `gateway_loops_detected_total` (counter): requests rejected with 508
//! - `gateway_upgrades_total` (counter): pairs handed off to raw forwarding
//! - `gateway_tls_hellos_total` (counter): sniffed ClientHellos by cipher policy
//!
//! # Design Decisions
//! - Labels are limited to service name, status code and policy so
//!   cardinality stays bounded
//! - The exporter is optional; without it every helper is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(service: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn pair_opened() {
    gauge!("gateway_active_pairs").increment(1.0);
}

pub fn pair_closed() {
    gauge!("gateway_active_pairs").decrement(1.0);
}

pub fn loop_detected(service: &str) {
    counter!("gateway_loops_detected_total", "service" => service.to_string()).increment(1);
}

pub fn upgrade(service: &str) {
    counter!("gateway_upgrades_total", "service" => service.to_string()).increment(1);
}

/// `policy` is `"modern"` or `"legacy_rc4"`.
pub fn tls_hello(policy: &'static str) {
    counter!("gateway_tls_hellos_total", "policy" => policy).increment(1);
}
