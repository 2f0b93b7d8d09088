//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the monitor.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dashboard::aggregator::AggregatorConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;

/// Root configuration for the resilience monitor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Dashboard HTTP API.
    pub admin: AdminConfig,

    /// Context store and span recorder bounds.
    pub tracing: TracingConfig,

    /// Error history and dashboard collection.
    pub aggregator: AggregatorSettings,

    /// Breaker settings applied to every dependency unless overridden.
    pub breaker_defaults: BreakerSettings,

    /// Downstream dependencies guarded by a breaker and probed periodically.
    pub dependencies: Vec<DependencyConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty output for development, JSON for production.
    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Dashboard API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the dashboard API.
    pub enabled: bool,

    /// Bind address for the dashboard API.
    pub bind_address: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Live contexts kept by the context store.
    pub context_capacity: usize,

    /// Spans kept by the recorder before the oldest are evicted.
    pub span_capacity: usize,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            context_capacity: 1000,
            span_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorSettings {
    /// Error records retained for summaries.
    pub error_history_capacity: usize,

    /// Raw entries kept per error code in a summary.
    pub recent_errors_per_code: usize,

    /// Error codes listed on the dashboard.
    pub top_error_codes: usize,

    /// Dashboard refresh interval in seconds.
    pub collect_interval_secs: u64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            error_history_capacity: 1000,
            recent_errors_per_code: 10,
            top_error_codes: 5,
            collect_interval_secs: 10,
        }
    }
}

impl AggregatorSettings {
    pub fn to_aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            error_history_capacity: self.error_history_capacity,
            recent_errors_per_code: self.recent_errors_per_code,
            top_error_codes: self.top_error_codes,
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Failures in CLOSED before the circuit opens.
    pub failure_threshold: u32,

    /// Successes in HALF_OPEN before the circuit closes.
    pub success_threshold: u32,

    /// Time spent OPEN before a probe is allowed, in milliseconds.
    pub timeout_ms: u64,

    /// Concurrent trial calls admitted in HALF_OPEN (defaults to success_threshold).
    pub half_open_max_calls: Option<u32>,

    /// Response time samples kept for percentiles.
    pub response_time_capacity: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            half_open_max_calls: None,
            response_time_capacity: 1000,
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
            half_open_max_calls: self.half_open_max_calls.unwrap_or(self.success_threshold),
            response_time_capacity: self.response_time_capacity,
        }
    }
}

/// Per-dependency overrides of the breaker defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerOverrides {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub half_open_max_calls: Option<u32>,
    pub response_time_capacity: Option<usize>,
}

/// A downstream dependency probed through its own breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DependencyConfig {
    /// Unique name; also the breaker name on the dashboard.
    pub name: String,

    /// URL probed with GET.
    pub url: String,

    /// Probe interval in seconds.
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    /// Probe timeout in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,

    /// Breaker overrides for this dependency.
    #[serde(default)]
    pub breaker: BreakerOverrides,

    /// Status reported as a degraded probe result while the circuit is open.
    #[serde(default)]
    pub fallback_status: Option<u16>,
}

fn default_probe_interval() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    2000
}

impl DependencyConfig {
    /// Merge this dependency's overrides onto the shared defaults.
    pub fn breaker_settings(&self, defaults: &BreakerSettings) -> BreakerSettings {
        let o = &self.breaker;
        BreakerSettings {
            failure_threshold: o.failure_threshold.unwrap_or(defaults.failure_threshold),
            success_threshold: o.success_threshold.unwrap_or(defaults.success_threshold),
            timeout_ms: o.timeout_ms.unwrap_or(defaults.timeout_ms),
            half_open_max_calls: o.half_open_max_calls.or(defaults.half_open_max_calls),
            response_time_capacity: o
                .response_time_capacity
                .unwrap_or(defaults.response_time_capacity),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: MonitorConfig = toml::from_str("").unwrap();
        assert_eq!(config.tracing.context_capacity, 1000);
        assert_eq!(config.breaker_defaults.failure_threshold, 5);
        assert!(config.dependencies.is_empty());
    }

    #[test]
    fn test_dependency_overrides_merge() {
        let config: MonitorConfig = toml::from_str(
            r#"
            [breaker_defaults]
            failure_threshold = 4
            timeout_ms = 1000

            [[dependencies]]
            name = "templates"
            url = "http://127.0.0.1:3000/health"

            [dependencies.breaker]
            failure_threshold = 2
            "#,
        )
        .unwrap();

        let dep = &config.dependencies[0];
        assert_eq!(dep.interval_secs, 10);
        let merged = dep.breaker_settings(&config.breaker_defaults);
        assert_eq!(merged.failure_threshold, 2);
        assert_eq!(merged.timeout_ms, 1000);

        let breaker = merged.to_breaker_config();
        assert_eq!(breaker.half_open_max_calls, merged.success_threshold);
        assert_eq!(breaker.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_log_format_parses_lowercase() {
        let config: MonitorConfig = toml::from_str(
            r#"
            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
