//! Cross-breaker metrics and error aggregation.
//!
//! # Responsibilities
//! - Keep the name → breaker registry
//! - Keep a bounded history of ad-hoc error records
//! - Group errors by code into summaries
//! - Produce independent point-in-time dashboard snapshots
//!
//! # Design Decisions
//! - Re-registering a name replaces the previous breaker
//! - The error history is separate from breaker counters, so errors not tied
//!   to one breaker call can still be recorded
//! - Each breaker's metrics are read under that breaker's own lock; there is
//!   no ordering between breakers within one snapshot
//! - The system health score is the unweighted mean of per-breaker scores
//!   (healthy 100, degraded 50, critical 0), and 100 with no breakers

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::buffer::RingBuffer;
use crate::context::now_millis;
use crate::resilience::circuit_breaker::{BreakerMetrics, CircuitBreaker, HealthStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub error_history_capacity: usize,
    /// Raw entries kept on each error summary.
    pub recent_errors_per_code: usize,
    /// Length of the snapshot's top-errors list.
    pub top_error_codes: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            error_history_capacity: 1000,
            recent_errors_per_code: 10,
            top_error_codes: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub breaker_name: String,
    pub error_code: String,
    pub message: String,
    pub stack: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub error_code: String,
    pub count: usize,
    pub last_occurrence: u64,
    /// Sorted, deduplicated.
    pub affected_breakers: Vec<String>,
    /// Newest first.
    pub recent: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopError {
    pub error_code: String,
    pub count: usize,
}

/// Point-in-time fleet view. Holds copies only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub timestamp: u64,
    pub total_breakers: usize,
    pub healthy_breakers: usize,
    pub degraded_breakers: usize,
    pub critical_breakers: usize,
    pub system_health_score: f64,
    /// Sorted by name.
    pub breakers: Vec<BreakerMetrics>,
    pub total_errors: usize,
    pub error_summaries: Vec<ErrorSummary>,
    pub top_errors: Vec<TopError>,
}

/// Change in one error code's count between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTrend {
    pub error_code: String,
    pub previous: usize,
    pub current: usize,
    pub delta: i64,
}

#[derive(Debug)]
pub struct MetricsAggregator {
    config: AggregatorConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    errors: Mutex<RingBuffer<ErrorRecord>>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl MetricsAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        let errors = Mutex::new(RingBuffer::new(config.error_history_capacity));
        Self {
            config,
            breakers: DashMap::new(),
            errors,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn errors(&self) -> MutexGuard<'_, RingBuffer<ErrorRecord>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `breaker` under `name`, returning the breaker it replaced.
    pub fn register_breaker(&self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) -> Option<Arc<CircuitBreaker>> {
        let name = name.into();
        let previous = self.breakers.insert(name.clone(), breaker);
        if previous.is_some() {
            tracing::debug!(breaker = %name, "Replaced registered breaker");
        } else {
            tracing::debug!(breaker = %name, "Registered breaker");
        }
        previous
    }

    pub fn unregister_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, b)| b)
    }

    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|r| r.value().clone())
    }

    pub fn breaker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn record_error(
        &self,
        breaker_name: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
        stack: Option<String>,
    ) {
        let record = ErrorRecord {
            breaker_name: breaker_name.into(),
            error_code: error_code.into(),
            message: message.into(),
            stack,
            timestamp: now_millis(),
        };
        self.push_error(record);
    }

    /// Append an already timestamped record.
    pub fn push_error(&self, record: ErrorRecord) {
        tracing::debug!(breaker = %record.breaker_name, code = %record.error_code, "Error recorded");
        self.errors().push(record);
    }

    pub fn error_count(&self) -> usize {
        self.errors().len()
    }

    pub fn clear_errors(&self) {
        self.errors().clear();
    }

    /// Error history grouped by code, most frequent first.
    pub fn get_error_summaries(&self) -> Vec<ErrorSummary> {
        let history = self.errors().to_vec();
        summarize(&history, self.config.recent_errors_per_code)
    }

    /// Summaries over the records with `from <= timestamp <= until`.
    ///
    /// Counts, last occurrences and affected breakers only reflect records
    /// inside the range.
    pub fn get_error_summaries_between(&self, from: u64, until: u64) -> Vec<ErrorSummary> {
        let history: Vec<ErrorRecord> = self
            .errors()
            .iter()
            .filter(|r| (from..=until).contains(&r.timestamp))
            .cloned()
            .collect();
        summarize(&history, self.config.recent_errors_per_code)
    }

    /// Current metrics of every registered breaker, sorted by name.
    pub fn collect_metrics(&self) -> Vec<BreakerMetrics> {
        let registered: Vec<(String, Arc<CircuitBreaker>)> = self
            .breakers
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let mut metrics: Vec<BreakerMetrics> = registered
            .into_iter()
            .map(|(name, breaker)| {
                let mut m = breaker.metrics();
                m.name = name;
                m
            })
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    pub fn get_dashboard(&self) -> DashboardSnapshot {
        let breakers = self.collect_metrics();
        let history = self.errors().to_vec();
        let error_summaries = summarize(&history, self.config.recent_errors_per_code);

        let count = |health: HealthStatus| breakers.iter().filter(|m| m.health == health).count();
        let healthy_breakers = count(HealthStatus::Healthy);
        let degraded_breakers = count(HealthStatus::Degraded);
        let critical_breakers = count(HealthStatus::Critical);

        let top_errors = error_summaries
            .iter()
            .take(self.config.top_error_codes)
            .map(|s| TopError {
                error_code: s.error_code.clone(),
                count: s.count,
            })
            .collect();

        DashboardSnapshot {
            timestamp: now_millis(),
            total_breakers: breakers.len(),
            healthy_breakers,
            degraded_breakers,
            critical_breakers,
            system_health_score: system_health_score(&breakers),
            breakers,
            total_errors: history.len(),
            error_summaries,
            top_errors,
        }
    }

    /// Per-code count changes from `previous` to `current`, largest increase first.
    pub fn error_trends(previous: &DashboardSnapshot, current: &DashboardSnapshot) -> Vec<ErrorTrend> {
        let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for s in &previous.error_summaries {
            counts.entry(s.error_code.as_str()).or_default().0 = s.count;
        }
        for s in &current.error_summaries {
            counts.entry(s.error_code.as_str()).or_default().1 = s.count;
        }

        let mut trends: Vec<ErrorTrend> = counts
            .into_iter()
            .map(|(code, (previous, current))| ErrorTrend {
                error_code: code.to_string(),
                previous,
                current,
                delta: current as i64 - previous as i64,
            })
            .collect();
        trends.sort_by(|a, b| b.delta.cmp(&a.delta));
        trends
    }
}

pub fn system_health_score(breakers: &[BreakerMetrics]) -> f64 {
    if breakers.is_empty() {
        return 100.0;
    }
    breakers.iter().map(|m| m.health.score()).sum::<f64>() / breakers.len() as f64
}

fn summarize(history: &[ErrorRecord], recent_cap: usize) -> Vec<ErrorSummary> {
    struct Group<'a> {
        count: usize,
        last: u64,
        breakers: BTreeSet<&'a str>,
        entries: Vec<&'a ErrorRecord>,
    }

    let mut groups: BTreeMap<&str, Group<'_>> = BTreeMap::new();
    for record in history {
        let group = groups.entry(record.error_code.as_str()).or_insert_with(|| Group {
            count: 0,
            last: 0,
            breakers: BTreeSet::new(),
            entries: Vec::new(),
        });
        group.count += 1;
        group.last = group.last.max(record.timestamp);
        group.breakers.insert(record.breaker_name.as_str());
        group.entries.push(record);
    }

    let mut summaries: Vec<ErrorSummary> = groups
        .into_iter()
        .map(|(code, group)| ErrorSummary {
            error_code: code.to_string(),
            count: group.count,
            last_occurrence: group.last,
            affected_breakers: group.breakers.into_iter().map(str::to_string).collect(),
            recent: group
                .entries
                .into_iter()
                .rev()
                .take(recent_cap)
                .cloned()
                .collect(),
        })
        .collect();
    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.error_code.cmp(&b.error_code)));
    summaries
}
