//! Fleet health dashboard.
//!
//! # Data Flow
//! ```text
//! CircuitBreakers (registered by name) + ad-hoc error records
//!     → aggregator.rs (BreakerMetrics, ErrorSummary, DashboardSnapshot)
//!     → query.rs (latest snapshot, filters, alerts)
//!     → collector.rs (periodic refresh + gauges)
//! ```
//!
//! # Design Decisions
//! - Snapshots are copies; holding one never pins live breaker state
//! - The aggregator and query service are constructed by the composition
//!   root and passed to whoever needs them

pub mod aggregator;
pub mod collector;
pub mod query;

pub use aggregator::{
    AggregatorConfig, DashboardSnapshot, ErrorRecord, ErrorSummary, ErrorTrend, MetricsAggregator, TopError,
};
pub use collector::DashboardCollector;
pub use query::{Alerts, DashboardQuery, DashboardQueryService, QueryResult};
