//! Active dependency probing.
//!
//! # Responsibilities
//! - Periodically GET each configured dependency through its breaker
//! - Attach trace headers and record one span per probe
//! - Feed probe failures into the aggregator's error history
//!
//! # Design Decisions
//! - One loop per dependency, each on its own interval
//! - A non-2xx status is a failure, same as a connection error
//! - While the circuit is open the configured `fallback_status` (if any) is
//!   reported as a degraded result; without one the probe fails fast

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time;

use crate::config::{BreakerSettings, DependencyConfig};
use crate::context::{Metadata, SpanError, SpanStatus};
use crate::dashboard::MetricsAggregator;
use crate::resilience::error::{CIRCUIT_BREAKER_OPEN, OPERATION_FAILED, OPERATION_TIMEOUT};
use crate::resilience::{CircuitBreaker, CircuitBreakerWithFallback, FallbackData, FallbackError, ResultSource};
use crate::trace::{get_trace_headers, TraceRecorder};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("circuit open and no fallback status configured")]
    Unavailable,
}

impl ProbeError {
    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::Timeout(_) => OPERATION_TIMEOUT,
            ProbeError::Unavailable => CIRCUIT_BREAKER_OPEN,
            ProbeError::Request(_) | ProbeError::Status(_) => OPERATION_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub status: u16,
    /// Served by the fallback rather than the dependency.
    pub degraded: bool,
}

/// Result of one probe, as logged and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub dependency: String,
    pub success: bool,
    pub source: ResultSource,
    pub status: Option<u16>,
    pub error_code: Option<&'static str>,
    pub duration_ms: u64,
}

/// One dependency and the breaker guarding it.
pub struct ProbeTarget {
    name: String,
    url: String,
    interval: Duration,
    timeout: Duration,
    guard: CircuitBreakerWithFallback<ProbeOutcome, ProbeError>,
}

impl ProbeTarget {
    pub fn new(dependency: &DependencyConfig, defaults: &BreakerSettings) -> Self {
        let config = dependency.breaker_settings(defaults).to_breaker_config();
        let breaker = Arc::new(CircuitBreaker::new(dependency.name.clone(), config));
        let fallback_status = dependency.fallback_status;
        let guard = CircuitBreakerWithFallback::new(breaker, move || async move {
            match fallback_status {
                Some(status) => Ok(ProbeOutcome { status, degraded: true }),
                None => Err(ProbeError::Unavailable),
            }
        });

        Self {
            name: dependency.name.clone(),
            url: dependency.url.clone(),
            interval: dependency.interval(),
            timeout: dependency.timeout(),
            guard,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.guard.breaker()
    }
}

pub struct ProbeMonitor {
    targets: Vec<Arc<ProbeTarget>>,
    client: reqwest::Client,
    recorder: Arc<TraceRecorder>,
    aggregator: Arc<MetricsAggregator>,
}

impl ProbeMonitor {
    /// Build the monitor and register every target's breaker with `aggregator`.
    pub fn new(
        targets: Vec<ProbeTarget>,
        recorder: Arc<TraceRecorder>,
        aggregator: Arc<MetricsAggregator>,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("resilience-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProbeError::Request)?;

        for target in &targets {
            aggregator.register_breaker(target.name.clone(), target.breaker().clone());
        }

        Ok(Self {
            targets: targets.into_iter().map(Arc::new).collect(),
            client,
            recorder,
            aggregator,
        })
    }

    pub fn targets(&self) -> impl Iterator<Item = &ProbeTarget> {
        self.targets.iter().map(|t| t.as_ref())
    }

    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        if self.targets.is_empty() {
            tracing::info!("No dependencies configured, probe monitor idle");
            return;
        }
        tracing::info!(dependencies = self.targets.len(), "Probe monitor starting");

        let monitor = Arc::new(self);
        let mut loops = JoinSet::new();
        for target in &monitor.targets {
            let monitor = monitor.clone();
            let target = target.clone();
            let mut shutdown = shutdown.resubscribe();
            loops.spawn(async move {
                let mut ticker = time::interval(target.interval);
                ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            monitor.probe(&target).await;
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        while loops.join_next().await.is_some() {}
        tracing::info!("Probe monitor received shutdown signal, exiting loop");
    }

    /// Probe every target once, sequentially.
    pub async fn probe_all(&self) -> Vec<ProbeReport> {
        let mut reports = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            reports.push(self.probe(target).await);
        }
        reports
    }

    async fn probe(&self, target: &ProbeTarget) -> ProbeReport {
        let mut metadata = Metadata::new();
        metadata.insert("dependency".into(), target.name.clone().into());
        metadata.insert("url".into(), target.url.clone().into());
        let context = self.recorder.create_context(Some(metadata.clone()));
        let request = self
            .client
            .get(&target.url)
            .headers(get_trace_headers(&context))
            .timeout(target.timeout);
        let timeout = target.timeout;

        let started = SystemTime::now();
        let result = target
            .guard
            .execute_with_fallback(move || async move {
                let response = request.send().await.map_err(|e| {
                    if e.is_timeout() {
                        ProbeError::Timeout(timeout)
                    } else {
                        ProbeError::Request(e)
                    }
                })?;
                let status = response.status();
                if status.is_success() {
                    Ok(ProbeOutcome {
                        status: status.as_u16(),
                        degraded: false,
                    })
                } else {
                    Err(ProbeError::Status(status.as_u16()))
                }
            })
            .await;
        let ended = SystemTime::now();

        let outcome = result.data().map(|data| match data {
            FallbackData::Primary(o) | FallbackData::Fallback(o) => *o,
        });
        let failure = match result.error() {
            Some(FallbackError::Primary(e)) | Some(FallbackError::Fallback(e)) => Some((e.code(), e.to_string())),
            Some(FallbackError::CircuitOpen { .. }) => {
                Some((CIRCUIT_BREAKER_OPEN, "circuit open, served fallback status".to_string()))
            }
            Some(other) => Some((other.code(), other.to_string())),
            None => None,
        };

        let (status, error) = match &failure {
            None => (SpanStatus::Success, None),
            Some((code, message)) if *code == OPERATION_TIMEOUT => {
                (SpanStatus::Timeout, Some(SpanError::new(*code, message.clone())))
            }
            Some((code, message)) => (SpanStatus::Error, Some(SpanError::new(*code, message.clone()))),
        };
        self.recorder.record_span(
            &context,
            format!("probe {}", target.name),
            status,
            started,
            ended,
            error,
            Some(metadata),
        );

        match &failure {
            Some((code, message)) => {
                self.aggregator.record_error(target.name.clone(), *code, message.clone(), None);
                tracing::warn!(dependency = %target.name, code = %code, error = %message, "Probe failed");
            }
            None => tracing::debug!(dependency = %target.name, "Probe succeeded"),
        }

        ProbeReport {
            dependency: target.name.clone(),
            success: result.success(),
            source: result.source(),
            status: outcome.map(|o| o.status),
            error_code: failure.map(|(code, _)| code),
            duration_ms: result.duration().as_millis() as u64,
        }
    }
}
