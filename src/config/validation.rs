//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, capacities, timeouts > 0)
//! - Detect duplicate dependency names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MonitorConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BreakerSettings, MonitorConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: String },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: String, value: String },

    #[error("dependency name must not be empty")]
    EmptyName,

    #[error("duplicate dependency name: {0}")]
    DuplicateName(String),

    #[error("dependency '{name}' has unsupported url: {url}")]
    InvalidUrl { name: String, url: String },
}

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::NotPositive { field: field.to_string() });
    }
}

fn address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

fn breaker(errors: &mut Vec<ValidationError>, prefix: &str, settings: &BreakerSettings) {
    positive(errors, &format!("{prefix}.failure_threshold"), settings.failure_threshold as u64);
    positive(errors, &format!("{prefix}.success_threshold"), settings.success_threshold as u64);
    positive(errors, &format!("{prefix}.timeout_ms"), settings.timeout_ms);
    positive(
        errors,
        &format!("{prefix}.response_time_capacity"),
        settings.response_time_capacity as u64,
    );
    if let Some(max) = settings.half_open_max_calls {
        positive(errors, &format!("{prefix}.half_open_max_calls"), max as u64);
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &MonitorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.observability.metrics_enabled {
        address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        positive(&mut errors, "admin.request_timeout_secs", config.admin.request_timeout_secs);
    }

    positive(&mut errors, "tracing.context_capacity", config.tracing.context_capacity as u64);
    positive(&mut errors, "tracing.span_capacity", config.tracing.span_capacity as u64);
    positive(
        &mut errors,
        "aggregator.error_history_capacity",
        config.aggregator.error_history_capacity as u64,
    );
    positive(
        &mut errors,
        "aggregator.collect_interval_secs",
        config.aggregator.collect_interval_secs,
    );

    breaker(&mut errors, "breaker_defaults", &config.breaker_defaults);

    let mut seen = HashSet::new();
    for dep in &config.dependencies {
        if dep.name.trim().is_empty() {
            errors.push(ValidationError::EmptyName);
        } else if !seen.insert(dep.name.as_str()) {
            errors.push(ValidationError::DuplicateName(dep.name.clone()));
        }

        if !(dep.url.starts_with("http://") || dep.url.starts_with("https://")) {
            errors.push(ValidationError::InvalidUrl {
                name: dep.name.clone(),
                url: dep.url.clone(),
            });
        }

        let prefix = format!("dependencies.{}", dep.name);
        positive(&mut errors, &format!("{prefix}.interval_secs"), dep.interval_secs);
        positive(&mut errors, &format!("{prefix}.timeout_ms"), dep.timeout_ms);
        breaker(
            &mut errors,
            &format!("{prefix}.breaker"),
            &dep.breaker_settings(&config.breaker_defaults),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
