//! Prometheus metrics for the engine gateway
//!
//! Everything is recorded through the `metrics` facade; nothing is exported
//! unless [`install_exporter`] has been called.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::rate_limiter::RequestClass;

/// Install the Prometheus exporter and describe all gateway metrics
pub fn install_exporter(listen_addr: &str) -> Result<()> {
    let addr: SocketAddr = listen_addr
        .parse()
        .with_context(|| format!("invalid metrics listen address '{listen_addr}'"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    register_metrics();
    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "engine_gateway_requests_total",
        "Authorized requests by dispatch kind"
    );
    describe_counter!(
        "engine_gateway_engine_attempts_total",
        "Forwarding attempts against the query engine by outcome"
    );
    describe_counter!(
        "engine_gateway_retries_exhausted_total",
        "Requests that failed on every forwarding attempt"
    );
    describe_counter!(
        "engine_gateway_commands_total",
        "Auxiliary store commands by outcome"
    );
    describe_histogram!(
        "engine_gateway_rate_limit_wait_seconds",
        "Time spent waiting for rate limit tokens"
    );
}

pub fn record_request(kind: &'static str) {
    counter!("engine_gateway_requests_total", "kind" => kind).increment(1);
}

pub fn record_engine_attempt(outcome: &'static str) {
    counter!("engine_gateway_engine_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_retries_exhausted() {
    counter!("engine_gateway_retries_exhausted_total").increment(1);
}

pub fn record_command(outcome: &'static str) {
    counter!("engine_gateway_commands_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limit_wait(class: RequestClass, waited: Duration) {
    histogram!("engine_gateway_rate_limit_wait_seconds", "class" => class.as_str())
        .record(waited.as_secs_f64());
}
