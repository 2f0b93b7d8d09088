//! Request-flow tracing.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → propagation.rs (X-*-ID headers → ExtractedTraceContext)
//!     → recorder.rs (continue or start a context, record spans)
//!     → store.rs (ambient lookup of live contexts by correlation id)
//! Outgoing request:
//!     → recorder.rs (child context) → propagation.rs (context → headers)
//! Read side:
//!     → recorder.rs (trace tree, summary) → export.rs (viewer wire format)
//! ```
//!
//! # Design Decisions
//! - Nothing here returns an error to the traced operation; malformed input
//!   is recorded as well as it can be or ignored
//! - Every span and context table is bounded

pub mod export;
pub mod propagation;
pub mod recorder;
pub mod store;

pub use export::{ExportedSpan, SpanLog};
pub use propagation::{extract_trace_context, get_trace_headers, ExtractedTraceContext};
pub use recorder::{SpanNode, TraceRecorder, TraceSummary, TraceTree};
pub use store::TraceContextStore;
