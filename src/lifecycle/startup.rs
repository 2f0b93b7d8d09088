//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated configuration
//! - Register each dependency's breaker with the aggregator
//! - Start background tasks (probes, dashboard collection)
//! - Bind the admin listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems are built in order and passed explicitly; there are no
//!   process-wide singletons
//! - Listeners start last (traffic only when ready)
//! - Shutdown waits a bounded time for tasks to drain

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::admin::{self, handlers::AdminState};
use crate::config::MonitorConfig;
use crate::dashboard::{DashboardCollector, DashboardQueryService, MetricsAggregator};
use crate::lifecycle::shutdown::Shutdown;
use crate::probe::{ProbeError, ProbeMonitor, ProbeTarget};
use crate::trace::{TraceContextStore, TraceRecorder};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build probe client: {0}")]
    Probe(#[from] ProbeError),

    #[error("failed to bind admin API on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("admin API failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// The assembled subsystem, ready to run.
pub struct Monitor {
    config: MonitorConfig,
    recorder: Arc<TraceRecorder>,
    contexts: Arc<TraceContextStore>,
    aggregator: Arc<MetricsAggregator>,
    dashboard: Arc<DashboardQueryService>,
    probes: ProbeMonitor,
}

impl Monitor {
    pub fn build(config: MonitorConfig) -> Result<Self, StartupError> {
        let recorder = Arc::new(TraceRecorder::new(config.tracing.span_capacity));
        let contexts = Arc::new(TraceContextStore::new(config.tracing.context_capacity));
        let aggregator = Arc::new(MetricsAggregator::new(config.aggregator.to_aggregator_config()));

        let targets = config
            .dependencies
            .iter()
            .map(|dep| ProbeTarget::new(dep, &config.breaker_defaults))
            .collect();
        let probes = ProbeMonitor::new(targets, recorder.clone(), aggregator.clone())?;

        // Built after registration so the first snapshot lists every breaker.
        let dashboard = Arc::new(DashboardQueryService::new(aggregator.clone()));

        tracing::info!(
            dependencies = config.dependencies.len(),
            span_capacity = config.tracing.span_capacity,
            context_capacity = config.tracing.context_capacity,
            "Monitor assembled"
        );

        Ok(Self {
            config,
            recorder,
            contexts,
            aggregator,
            dashboard,
            probes,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.recorder
    }

    pub fn contexts(&self) -> &Arc<TraceContextStore> {
        &self.contexts
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub fn dashboard(&self) -> &Arc<DashboardQueryService> {
        &self.dashboard
    }

    pub fn probes(&self) -> &ProbeMonitor {
        &self.probes
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState::new(self.dashboard.clone(), self.recorder.clone(), self.contexts.clone())
    }

    /// Bind the configured admin address (if enabled) and run until shutdown.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let listener = if self.config.admin.enabled {
            let address = self.config.admin.bind_address.clone();
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|source| StartupError::Bind { address, source })?;
            Some(listener)
        } else {
            tracing::info!("Admin API disabled");
            None
        };
        self.serve(listener, shutdown).await
    }

    /// Run background tasks, and the admin API on `listener` if given,
    /// until `shutdown` fires.
    pub async fn serve(self, listener: Option<TcpListener>, shutdown: Shutdown) -> Result<(), StartupError> {
        let mut stop = shutdown.subscribe();
        let mut tasks = JoinSet::new();

        let collector = DashboardCollector::new(
            self.dashboard.clone(),
            Duration::from_secs(self.config.aggregator.collect_interval_secs),
        );
        tasks.spawn(collector.run(shutdown.subscribe()));

        let admin = listener.map(|listener| {
            let router = admin::setup_admin_router(
                self.admin_state(),
                Duration::from_secs(self.config.admin.request_timeout_secs),
            );
            tokio::spawn(admin::serve(listener, router, shutdown.subscribe()))
        });

        let probes = self.probes;
        tasks.spawn(probes.run(shutdown.subscribe()));

        let _ = stop.recv().await;
        tracing::info!("Draining background tasks");

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "Background tasks did not stop in time");
            tasks.abort_all();
        }

        if let Some(handle) = admin {
            match handle.await {
                Ok(result) => result?,
                Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
            }
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }
}
