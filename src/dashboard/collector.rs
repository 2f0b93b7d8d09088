//! Periodic dashboard collection.
//!
//! # Responsibilities
//! - Refresh the query service's snapshot on a fixed interval
//! - Publish breaker and fleet gauges from each snapshot
//! - Log health changes between consecutive snapshots

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::dashboard::aggregator::DashboardSnapshot;
use crate::dashboard::query::DashboardQueryService;
use crate::observability::metrics;

pub struct DashboardCollector {
    service: Arc<DashboardQueryService>,
    interval: Duration,
}

impl DashboardCollector {
    pub fn new(service: Arc<DashboardQueryService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Collect one snapshot now.
    pub fn collect(&self) -> Arc<DashboardSnapshot> {
        let previous = self.service.latest();
        let snapshot = self.service.refresh();
        metrics::record_dashboard(&snapshot);

        if snapshot.critical_breakers > previous.critical_breakers {
            tracing::warn!(
                critical = snapshot.critical_breakers,
                score = snapshot.system_health_score,
                "Fleet health degraded"
            );
        } else if snapshot.system_health_score != previous.system_health_score {
            tracing::info!(
                from = previous.system_health_score,
                to = snapshot.system_health_score,
                "Fleet health score changed"
            );
        }
        snapshot
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Dashboard collector starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.collect();
                    tracing::debug!(
                        breakers = snapshot.total_breakers,
                        errors = snapshot.total_errors,
                        score = snapshot.system_health_score,
                        "Dashboard collected"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Dashboard collector received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
