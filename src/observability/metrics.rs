//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define session, authentication and probe metrics
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `session_active` (gauge): sessions currently running
//! - `session_iteration_seconds` (histogram): duration of one iteration-loop turn
//! - `session_receive_seconds` (histogram): dispatch time per received message
//! - `session_errors_total` (counter): by `kind` = transport | callback | tick
//! - `sas_validation_success_total` / `sas_validation_failure_total` (counter, `reason`)
//! - `sas_authentication_success_total` / `sas_authentication_failure_total` (counter)
//! - `sas_authentication_seconds` (histogram): issuance latency
//! - `probe_requests_total` (counter): by `probe` and `result`
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Active sessions are tracked with an RAII guard

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and start its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Increments `session_active` on creation, decrements on drop.
#[derive(Debug)]
pub struct ActiveSessionGuard(());

impl ActiveSessionGuard {
    pub fn new() -> Self {
        metrics::gauge!("session_active").increment(1.0);
        Self(())
    }
}

impl Default for ActiveSessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        metrics::gauge!("session_active").decrement(1.0);
    }
}

pub fn record_iteration(elapsed: Duration) {
    metrics::histogram!("session_iteration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_receive(elapsed: Duration) {
    metrics::histogram!("session_receive_seconds").record(elapsed.as_secs_f64());
}

pub fn record_session_error(kind: &'static str) {
    metrics::counter!("session_errors_total", "kind" => kind).increment(1);
}

pub fn record_validation_success() {
    metrics::counter!("sas_validation_success_total").increment(1);
}

pub fn record_validation_failure(reason: &'static str) {
    metrics::counter!("sas_validation_failure_total", "reason" => reason).increment(1);
}

pub fn record_authentication(success: bool, elapsed: Duration) {
    if success {
        metrics::counter!("sas_authentication_success_total").increment(1);
    } else {
        metrics::counter!("sas_authentication_failure_total").increment(1);
    }
    metrics::histogram!("sas_authentication_seconds").record(elapsed.as_secs_f64());
}

pub fn record_probe(probe: &'static str, healthy: bool) {
    let result = if healthy { "success" } else { "failure" };
    metrics::counter!("probe_requests_total", "probe" => probe, "result" => result).increment(1);
}
