//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON for machine parsing)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging via `tracing` fields, never formatted blobs
//! - Metrics go through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library users pay nothing
//! - Span recording for request flows lives in `crate::trace`, not here

pub mod logging;
pub mod metrics;
