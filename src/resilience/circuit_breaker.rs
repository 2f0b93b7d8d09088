//! Circuit breaker for downstream dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count reaches failure_threshold
//! Open → Half-Open: first call after `timeout` has elapsed
//! Half-Open → Closed: success_count reaches success_threshold
//! Half-Open → Open: any trial call fails
//! ```
//!
//! # Design Decisions
//! - Per-dependency breaker (never shared across dependencies)
//! - Failure counter is cumulative since the last transition, no rolling window
//! - All state lives behind one mutex that is never held across an await, so
//!   observers see either none or all of a call's bookkeeping
//! - Outcomes of calls admitted before a transition are tallied but do not
//!   drive the new state
//! - State-change listeners run after the lock is released

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::buffer::RingBuffer;
use crate::context::now_millis;
use crate::observability::metrics;
use crate::resilience::error::BreakerError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const ALL: [CircuitState; 3] = [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen];

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge encoding: 0=closed, 1=half-open, 2=open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health classification used by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    /// Healthy needs CLOSED and >= 80% success; OPEN or < 50% is critical.
    pub fn classify(state: CircuitState, success_rate: f64) -> Self {
        if state == CircuitState::Open || success_rate < 0.5 {
            HealthStatus::Critical
        } else if state == CircuitState::Closed && success_rate >= 0.8 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 100.0,
            HealthStatus::Degraded => 50.0,
            HealthStatus::Critical => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Time spent OPEN before a trial call is admitted.
    pub timeout: Duration,
    /// Concurrent trial calls admitted while HALF_OPEN.
    pub half_open_max_calls: u32,
    /// Response time samples kept for percentiles.
    pub response_time_capacity: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 2,
            response_time_capacity: 1000,
        }
    }
}

/// Time spent in one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDurationStats {
    pub state: CircuitState,
    /// Completed stays in this state.
    pub visits: u32,
    pub total_ms: f64,
    pub average_ms: f64,
}

/// Point-in-time copy of one breaker's counters and derived figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_requests: u64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub last_failure_time: Option<u64>,
    pub last_state_change: u64,
    pub time_in_current_state_ms: u64,
    pub state_durations: Vec<StateDurationStats>,
    pub health: HealthStatus,
}

/// Observer invoked on every transition with the new state.
pub type StateChangeListener = Arc<dyn Fn(CircuitState, &BreakerMetrics) + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
struct DurationTotals {
    total: Duration,
    visits: u32,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

#[derive(Debug, Clone, Copy)]
struct Admission {
    state: CircuitState,
    generation: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every transition; stale outcomes are detected against it.
    generation: u64,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    rejected_requests: u64,
    response_times: RingBuffer<Duration>,
    state_entered_at: Instant,
    last_state_change: u64,
    last_failure_time: Option<u64>,
    state_durations: HashMap<CircuitState, DurationTotals>,
}

impl BreakerInner {
    fn new(response_time_capacity: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            failure_count: 0,
            success_count: 0,
            half_open_in_flight: 0,
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            rejected_requests: 0,
            response_times: RingBuffer::new(response_time_capacity),
            state_entered_at: Instant::now(),
            last_state_change: now_millis(),
            last_failure_time: None,
            state_durations: HashMap::new(),
        }
    }

    fn transition(&mut self, to: CircuitState) -> Transition {
        let from = self.state;
        let now = Instant::now();
        let stay = self.state_durations.entry(from).or_default();
        stay.total += now.saturating_duration_since(self.state_entered_at);
        stay.visits += 1;

        self.state = to;
        self.generation += 1;
        self.state_entered_at = now;
        self.last_state_change = now_millis();
        self.success_count = 0;
        self.half_open_in_flight = 0;
        // CLOSED→OPEN keeps the count that tripped the circuit.
        if !(from == CircuitState::Closed && to == CircuitState::Open) {
            self.failure_count = 0;
        }
        Transition { from, to }
    }

    fn success_rate(&self) -> f64 {
        let completed = self.total_successes + self.total_failures;
        if completed == 0 {
            1.0
        } else {
            self.total_successes as f64 / completed as f64
        }
    }

    fn sorted_samples(&self) -> Vec<Duration> {
        let mut samples = self.response_times.to_vec();
        samples.sort_unstable();
        samples
    }
}

/// Value at rank `ceil(p/100 * n)` of an ascending sample set; zero when empty.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let n = sorted.len();
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Returns a HALF_OPEN trial slot if the call is dropped before it settles.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    armed: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.breaker.lock();
        if inner.generation == self.admission.generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

/// Guards a single downstream dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    listeners: RwLock<Vec<StateChangeListener>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = BreakerInner::new(config.response_time_capacity);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(inner),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a state-change observer.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(CircuitState, &BreakerMetrics) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Invoke `operation` if the circuit permits it.
    ///
    /// Returns [`BreakerError::Open`] without calling `operation` while the
    /// circuit is open. The operation's own errors come back as
    /// [`BreakerError::Operation`] and count as failures.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (admission, probe) = match self.admit() {
            Ok(admitted) => admitted,
            Err(retry_after) => {
                debug!(breaker = %self.name, ?retry_after, "Call rejected, circuit open");
                metrics::record_breaker_call(&self.name, "rejected", None);
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                    retry_after,
                });
            }
        };
        if let Some(transition) = probe {
            self.notify(transition);
        }

        let mut slot = TrialSlot {
            breaker: self,
            admission,
            armed: admission.state == CircuitState::HalfOpen,
        };
        let started = Instant::now();
        let result = operation().await;
        let elapsed = started.elapsed();
        slot.armed = false;

        if let Some(transition) = self.complete(admission, result.is_ok(), elapsed) {
            self.notify(transition);
        }

        result.map_err(BreakerError::Operation)
    }

    /// Decide whether a call may proceed; `Err` carries the retry-after hint.
    fn admit(&self) -> Result<(Admission, Option<Transition>), Duration> {
        let mut inner = self.lock();
        inner.total_requests += 1;

        let mut probe = None;
        if inner.state == CircuitState::Open {
            let open_for = inner.state_entered_at.elapsed();
            if open_for < self.config.timeout {
                inner.rejected_requests += 1;
                return Err(self.config.timeout - open_for);
            }
            probe = Some(inner.transition(CircuitState::HalfOpen));
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_in_flight >= self.config.half_open_max_calls.max(1) {
                inner.rejected_requests += 1;
                return Err(Duration::ZERO);
            }
            inner.half_open_in_flight += 1;
        }

        Ok((
            Admission {
                state: inner.state,
                generation: inner.generation,
            },
            probe,
        ))
    }

    fn complete(&self, admission: Admission, success: bool, elapsed: Duration) -> Option<Transition> {
        let mut inner = self.lock();
        inner.response_times.push(elapsed);
        metrics::record_breaker_call(
            &self.name,
            if success { "success" } else { "failure" },
            Some(elapsed),
        );

        if success {
            inner.total_successes += 1;
        } else {
            inner.total_failures += 1;
            inner.last_failure_time = Some(now_millis());
        }

        if inner.generation != admission.generation {
            debug!(breaker = %self.name, admitted = %admission.state, current = %inner.state, "Stale call outcome ignored for state");
            return None;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.success_count += 1;
                None
            }
            (CircuitState::Closed, false) => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    Some(inner.transition(CircuitState::Open))
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    Some(inner.transition(CircuitState::Closed))
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, false) => Some(inner.transition(CircuitState::Open)),
            (CircuitState::Open, _) => None,
        }
    }

    fn notify(&self, transition: Transition) {
        match transition.to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                from = %transition.from,
                to = %transition.to,
                "Circuit opened"
            ),
            _ => info!(
                breaker = %self.name,
                from = %transition.from,
                to = %transition.to,
                "Circuit state changed"
            ),
        }
        metrics::record_breaker_transition(&self.name, transition.from, transition.to);

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return;
        }
        let snapshot = self.metrics();
        for listener in listeners {
            listener(transition.to, &snapshot);
        }
    }

    /// Force the circuit OPEN, restarting the open timer.
    pub fn force_open(&self) {
        let transition = {
            let mut inner = self.lock();
            if inner.state == CircuitState::Open {
                inner.state_entered_at = Instant::now();
                None
            } else {
                Some(inner.transition(CircuitState::Open))
            }
        };
        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    /// Clear all counters and samples and force CLOSED.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            let from = inner.state;
            let generation = inner.generation + 1;
            *inner = BreakerInner::new(self.config.response_time_capacity);
            inner.generation = generation;
            (from != CircuitState::Closed).then_some(Transition {
                from,
                to: CircuitState::Closed,
            })
        };
        info!(breaker = %self.name, "Circuit reset");
        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    pub fn response_time_percentile(&self, p: f64) -> Duration {
        percentile(&self.lock().sorted_samples(), p)
    }

    /// Mean length of completed stays in `state`; zero if never left it.
    pub fn average_state_duration(&self, state: CircuitState) -> Duration {
        let inner = self.lock();
        match inner.state_durations.get(&state) {
            Some(totals) if totals.visits > 0 => totals.total / totals.visits,
            _ => Duration::ZERO,
        }
    }

    pub fn health(&self) -> HealthStatus {
        let inner = self.lock();
        HealthStatus::classify(inner.state, inner.success_rate())
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock();
        let samples = inner.sorted_samples();
        let average = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|d| millis(*d)).sum::<f64>() / samples.len() as f64
        };
        let success_rate = inner.success_rate();

        let state_durations = CircuitState::ALL
            .iter()
            .map(|state| {
                let totals = inner.state_durations.get(state).copied().unwrap_or_default();
                let total_ms = millis(totals.total);
                StateDurationStats {
                    state: *state,
                    visits: totals.visits,
                    total_ms,
                    average_ms: if totals.visits > 0 { total_ms / totals.visits as f64 } else { 0.0 },
                }
            })
            .collect();

        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_requests: inner.rejected_requests,
            success_rate,
            average_response_time_ms: average,
            p50_response_time_ms: millis(percentile(&samples, 50.0)),
            p95_response_time_ms: millis(percentile(&samples, 95.0)),
            p99_response_time_ms: millis(percentile(&samples, 99.0)),
            last_failure_time: inner.last_failure_time,
            last_state_change: inner.last_state_change,
            time_in_current_state_ms: inner.state_entered_at.elapsed().as_millis() as u64,
            state_durations,
            health: HealthStatus::classify(inner.state, success_rate),
        }
    }
}
