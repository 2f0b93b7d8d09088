//! Resilience and observability core: circuit breakers with fallbacks,
//! request tracing with header propagation, and a fleet health dashboard.

pub mod buffer;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod lifecycle;
pub mod observability;
pub mod probe;
pub mod resilience;
pub mod trace;
pub mod admin;

pub use config::schema::MonitorConfig;
pub use context::{ExecutionContext, ExecutionSpan, SpanStatus};
pub use dashboard::{DashboardQueryService, DashboardSnapshot, MetricsAggregator};
pub use lifecycle::{Monitor, Shutdown};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerWithFallback, CircuitState};
pub use trace::{TraceContextStore, TraceRecorder};
