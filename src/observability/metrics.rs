//! Metrics collection and exposition.
//!
//! # Metrics
//! - `breaker_calls_total` (counter): calls by breaker, outcome
//! - `breaker_call_duration_seconds` (histogram): guarded call latency
//! - `breaker_transitions_total` (counter): state changes by breaker, from, to
//! - `breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `fallback_invocations_total` (counter): results by source
//! - `trace_spans_recorded_total` (counter): spans by status
//! - `dashboard_system_health_score` (gauge): 0-100 fleet score
//! - `dashboard_breakers` (gauge): breaker count by health

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::context::SpanStatus;
use crate::dashboard::DashboardSnapshot;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::fallback::ResultSource;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_breaker_call(breaker: &str, outcome: &'static str, duration: Option<Duration>) {
    counter!("breaker_calls_total", "breaker" => breaker.to_string(), "outcome" => outcome)
        .increment(1);
    if let Some(duration) = duration {
        histogram!("breaker_call_duration_seconds", "breaker" => breaker.to_string())
            .record(duration.as_secs_f64());
    }
}

pub fn record_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_breaker_state(breaker, to);
}

pub fn record_breaker_state(breaker: &str, state: CircuitState) {
    gauge!("breaker_state", "breaker" => breaker.to_string()).set(state.as_gauge());
}

pub fn record_fallback(source: ResultSource) {
    counter!("fallback_invocations_total", "source" => source.as_str()).increment(1);
}

pub fn record_span(status: SpanStatus) {
    counter!("trace_spans_recorded_total", "status" => status.as_str()).increment(1);
}

pub fn record_dashboard(snapshot: &DashboardSnapshot) {
    gauge!("dashboard_system_health_score").set(snapshot.system_health_score);
    gauge!("dashboard_breakers", "health" => "healthy").set(snapshot.healthy_breakers as f64);
    gauge!("dashboard_breakers", "health" => "degraded").set(snapshot.degraded_breakers as f64);
    gauge!("dashboard_breakers", "health" => "critical").set(snapshot.critical_breakers as f64);
    for breaker in &snapshot.breakers {
        record_breaker_state(&breaker.name, breaker.state);
    }
}
