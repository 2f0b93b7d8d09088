//! Read-only queries and alerts over the latest dashboard snapshot.
//!
//! # Design Decisions
//! - The latest snapshot is swapped atomically on refresh; readers never
//!   block the collector and always see a whole snapshot
//! - Query filters are optional and combine with AND
//! - Alerts are a pure function of the latest snapshot: no deduplication,
//!   no rate limiting

use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use serde::{Deserialize, Serialize};

use crate::dashboard::aggregator::{DashboardSnapshot, ErrorSummary, ErrorTrend, MetricsAggregator};
use crate::resilience::circuit_breaker::{BreakerMetrics, HealthStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardQuery {
    pub breaker_name: Option<String>,
    pub error_code: Option<String>,
    /// Error summaries count only records within this window before the
    /// snapshot time.
    pub time_window: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub timestamp: u64,
    pub breakers: Vec<BreakerMetrics>,
    pub error_summaries: Vec<ErrorSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alerts {
    pub critical: Vec<String>,
    pub warning: Vec<String>,
}

#[derive(Debug)]
pub struct DashboardQueryService {
    aggregator: Arc<MetricsAggregator>,
    latest: ArcSwap<DashboardSnapshot>,
    previous: ArcSwapOption<DashboardSnapshot>,
}

impl DashboardQueryService {
    /// Takes an initial snapshot immediately.
    pub fn new(aggregator: Arc<MetricsAggregator>) -> Self {
        let first = aggregator.get_dashboard();
        Self {
            aggregator,
            latest: ArcSwap::from_pointee(first),
            previous: ArcSwapOption::empty(),
        }
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    /// Recompute and publish a new snapshot.
    pub fn refresh(&self) -> Arc<DashboardSnapshot> {
        let snapshot = Arc::new(self.aggregator.get_dashboard());
        let old = self.latest.swap(snapshot.clone());
        self.previous.store(Some(old));
        snapshot
    }

    pub fn latest(&self) -> Arc<DashboardSnapshot> {
        self.latest.load_full()
    }

    /// Error count changes between the last two snapshots.
    pub fn trends(&self) -> Vec<ErrorTrend> {
        let latest = self.latest.load();
        match self.previous.load_full() {
            Some(previous) => MetricsAggregator::error_trends(&previous, &latest),
            None => MetricsAggregator::error_trends(&DashboardSnapshot::empty_like(&latest), &latest),
        }
    }

    /// Filter the latest snapshot.
    ///
    /// With a time window the error summaries are recomputed from the error
    /// history between the window start and the snapshot time.
    pub fn query(&self, query: &DashboardQuery) -> QueryResult {
        let snapshot = self.latest.load();
        match query.time_window {
            Some(window) => {
                let cutoff = window_start(&snapshot, window);
                let summaries = self
                    .aggregator
                    .get_error_summaries_between(cutoff, snapshot.timestamp);
                filter(&snapshot, &summaries, query)
            }
            None => filter(&snapshot, &snapshot.error_summaries, query),
        }
    }

    pub fn get_alerts(&self) -> Alerts {
        alerts(&self.latest.load())
    }
}

impl DashboardSnapshot {
    fn empty_like(other: &DashboardSnapshot) -> DashboardSnapshot {
        DashboardSnapshot {
            timestamp: other.timestamp,
            total_breakers: 0,
            healthy_breakers: 0,
            degraded_breakers: 0,
            critical_breakers: 0,
            system_health_score: 100.0,
            breakers: Vec::new(),
            total_errors: 0,
            error_summaries: Vec::new(),
            top_errors: Vec::new(),
        }
    }
}

fn window_start(snapshot: &DashboardSnapshot, window: Duration) -> u64 {
    snapshot.timestamp.saturating_sub(window.as_millis() as u64)
}

/// Apply the breaker and code filters of `query` to `snapshot`, taking
/// error summaries from `summaries`.
///
/// Summaries must match the code and list the breaker among those
/// affected. Breakers must match the name and, when a code is given, be
/// affected by that code. `summaries` are expected to already cover
/// `query.time_window`; summaries last seen before the window are dropped.
pub fn filter(snapshot: &DashboardSnapshot, summaries: &[ErrorSummary], query: &DashboardQuery) -> QueryResult {
    let cutoff = query.time_window.map(|w| window_start(snapshot, w));

    let error_summaries: Vec<ErrorSummary> = summaries
        .iter()
        .filter(|s| query.error_code.as_deref().map_or(true, |code| s.error_code == code))
        .filter(|s| {
            query
                .breaker_name
                .as_ref()
                .map_or(true, |name| s.affected_breakers.contains(name))
        })
        .filter(|s| cutoff.map_or(true, |cutoff| s.last_occurrence >= cutoff))
        .cloned()
        .collect();

    let breakers = snapshot
        .breakers
        .iter()
        .filter(|b| query.breaker_name.as_ref().map_or(true, |name| &b.name == name))
        .filter(|b| match &query.error_code {
            None => true,
            Some(_) => error_summaries
                .iter()
                .any(|s| s.affected_breakers.contains(&b.name)),
        })
        .cloned()
        .collect();

    QueryResult {
        timestamp: snapshot.timestamp,
        breakers,
        error_summaries,
    }
}

pub fn alerts(snapshot: &DashboardSnapshot) -> Alerts {
    let mut alerts = Alerts::default();
    for breaker in &snapshot.breakers {
        let message = format!(
            "{}: circuit {}, success rate {:.1}%",
            breaker.name,
            breaker.state,
            breaker.success_rate * 100.0
        );
        match breaker.health {
            HealthStatus::Critical => alerts.critical.push(message),
            HealthStatus::Degraded => alerts.warning.push(message),
            HealthStatus::Healthy => {}
        }
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::aggregator::ErrorRecord;
    use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

    async fn fleet() -> Arc<MetricsAggregator> {
        let aggregator = Arc::new(MetricsAggregator::default());

        let search = Arc::new(CircuitBreaker::with_defaults("search"));
        search.execute(|| async { Ok::<_, String>(()) }).await.unwrap();

        let billing = Arc::new(CircuitBreaker::with_defaults("billing"));
        billing.force_open();

        // 2 of 3 successes while CLOSED: degraded.
        let locale = Arc::new(CircuitBreaker::new("locale", CircuitBreakerConfig::default()));
        locale.execute(|| async { Ok::<_, String>(()) }).await.unwrap();
        locale.execute(|| async { Ok::<_, String>(()) }).await.unwrap();
        let _ = locale.execute(|| async { Err::<(), _>("x".to_string()) }).await;

        aggregator.register_breaker("search", search);
        aggregator.register_breaker("billing", billing);
        aggregator.register_breaker("locale", locale);

        aggregator.record_error("billing", "CIRCUIT_BREAKER_OPEN", "open", None);
        aggregator.record_error("locale", "OPERATION_FAILED", "x", None);
        aggregator.record_error("billing", "OPERATION_FAILED", "y", None);
        aggregator
    }

    #[tokio::test]
    async fn test_alerts_partition_by_health() {
        let service = DashboardQueryService::new(fleet().await);
        let alerts = service.get_alerts();
        assert_eq!(alerts.critical.len(), 1);
        assert!(alerts.critical[0].starts_with("billing: circuit OPEN"));
        assert_eq!(alerts.warning.len(), 1);
        assert!(alerts.warning[0].starts_with("locale: circuit CLOSED"));
    }

    #[tokio::test]
    async fn test_query_filters_combine() {
        let service = DashboardQueryService::new(fleet().await);

        let all = service.query(&DashboardQuery::default());
        assert_eq!(all.breakers.len(), 3);
        assert_eq!(all.error_summaries.len(), 2);

        let by_code = service.query(&DashboardQuery {
            error_code: Some("OPERATION_FAILED".into()),
            ..Default::default()
        });
        let names: Vec<_> = by_code.breakers.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["billing", "locale"]);

        let both = service.query(&DashboardQuery {
            breaker_name: Some("billing".into()),
            error_code: Some("CIRCUIT_BREAKER_OPEN".into()),
            ..Default::default()
        });
        assert_eq!(both.breakers.len(), 1);
        assert_eq!(both.error_summaries.len(), 1);

        let none = service.query(&DashboardQuery {
            breaker_name: Some("search".into()),
            error_code: Some("OPERATION_FAILED".into()),
            ..Default::default()
        });
        assert!(none.breakers.is_empty());
        assert!(none.error_summaries.is_empty());
    }

    #[test]
    fn test_time_window_recounts_from_history() {
        let aggregator = Arc::new(MetricsAggregator::default());
        let now = crate::context::now_millis();
        let record = |breaker: &str, age_ms: u64| ErrorRecord {
            breaker_name: breaker.to_string(),
            error_code: "OPERATION_FAILED".to_string(),
            message: "down".to_string(),
            stack: None,
            timestamp: now - age_ms,
        };
        aggregator.push_error(record("billing", 300_000));
        aggregator.push_error(record("billing", 200_000));
        aggregator.push_error(record("search", 1_000));
        let service = DashboardQueryService::new(aggregator.clone());

        // Newer than the snapshot, so outside every window.
        let taken = service.latest().timestamp;
        aggregator.push_error(ErrorRecord {
            timestamp: taken + 1_000,
            ..record("locale", 0)
        });

        let everything = service.query(&DashboardQuery::default());
        assert_eq!(everything.error_summaries[0].count, 3);

        let windowed = service.query(&DashboardQuery {
            time_window: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        assert_eq!(windowed.error_summaries.len(), 1);
        let summary = &windowed.error_summaries[0];
        assert_eq!(summary.count, 1);
        assert_eq!(summary.affected_breakers, vec!["search".to_string()]);
        assert_eq!(summary.last_occurrence, now - 1_000);

        let billing = service.query(&DashboardQuery {
            breaker_name: Some("billing".into()),
            time_window: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        assert!(billing.error_summaries.is_empty());

        let wide = service.query(&DashboardQuery {
            time_window: Some(Duration::from_secs(600)),
            ..Default::default()
        });
        assert_eq!(wide.error_summaries[0].count, 3);
    }

    #[tokio::test]
    async fn test_refresh_swaps_snapshot_and_tracks_trends() {
        let aggregator = Arc::new(MetricsAggregator::default());
        let service = DashboardQueryService::new(aggregator.clone());
        assert_eq!(service.latest().total_breakers, 0);

        aggregator.register_breaker("search", Arc::new(CircuitBreaker::with_defaults("search")));
        aggregator.record_error("search", "E", "m", None);
        let held = service.latest();
        service.refresh();

        assert_eq!(held.total_breakers, 0);
        assert_eq!(service.latest().total_breakers, 1);
        let trends = service.trends();
        assert_eq!(trends[0].delta, 1);
    }
}
