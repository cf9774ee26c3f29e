//! Metrics collection and exposition.
//!
//! # Metrics
//! - `registry_services` (gauge): registered services
//! - `registry_selections_total` (counter): selections by result (hit, empty)
//! - `registry_evictions_total` (counter): expired nodes deleted from the store
//! - `registry_eviction_failures_total` (counter): failed cleanup batches
//! - `registry_eviction_dropped_total` (counter): reports dropped on a full queue
//! - `registry_watch_events_total` (counter): store events by kind
//! - `registry_api_requests_total` (counter): API requests by method, status
//! - `registry_api_request_duration_seconds` (histogram): API latency

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_services(total: usize) {
    gauge!("registry_services").set(total as f64);
}

pub fn record_selection(hit: bool) {
    let result = if hit { "hit" } else { "empty" };
    counter!("registry_selections_total", "result" => result).increment(1);
}

pub fn record_eviction(nodes: usize) {
    counter!("registry_evictions_total").increment(nodes as u64);
}

pub fn record_eviction_failure() {
    counter!("registry_eviction_failures_total").increment(1);
}

pub fn record_eviction_dropped() {
    counter!("registry_eviction_dropped_total").increment(1);
}

pub fn record_watch_event(kind: &'static str) {
    counter!("registry_watch_events_total", "kind" => kind).increment(1);
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "registry_api_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("registry_api_request_duration_seconds").record(start.elapsed().as_secs_f64());
}
