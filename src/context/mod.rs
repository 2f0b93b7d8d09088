//! Execution context and span model.
//!
//! # Data Flow
//! ```text
//! Caller starts a logical operation
//!     → ExecutionContext (root: fresh correlation/trace/span ids)
//!     → child contexts (same trace id, fresh span id, parent = caller span)
//!     → ExecutionSpan recorded per completed operation
//! ```
//!
//! # Design Decisions
//! - Pure data: no logic beyond construction helpers
//! - Contexts are never mutated; deriving a child yields a new value
//! - Timestamps are wall-clock (`SystemTime`) so they export as epoch values

pub mod ids;

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque key/value metadata attached to contexts and spans.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Milliseconds since the Unix epoch.
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn now_millis() -> u64 {
    epoch_millis(SystemTime::now())
}

/// Identifies one logical request flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub correlation_id: String,
    pub trace_id: Option<String>,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time, epoch milliseconds.
    pub timestamp: u64,
}

impl ExecutionContext {
    /// Root context with freshly generated identifiers.
    pub fn root(metadata: Metadata) -> Self {
        Self {
            correlation_id: ids::correlation_id(),
            trace_id: Some(ids::trace_id()),
            span_id: ids::span_id(),
            parent_span_id: None,
            metadata,
            timestamp: now_millis(),
        }
    }

    /// Child of `self`: shares correlation and trace ids, gets a new span id.
    pub fn child(&self) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            span_id: ids::span_id(),
            parent_span_id: Some(self.span_id.clone()),
            metadata: self.metadata.clone(),
            timestamp: now_millis(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

/// Outcome of a recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Success,
    Error,
    Timeout,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Success => "success",
            SpanStatus::Error => "error",
            SpanStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload carried by failed spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanError {
    pub code: String,
    pub message: String,
    pub stack: Option<String>,
}

impl SpanError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Immutable record of one completed (or failed) operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSpan {
    pub correlation_id: String,
    pub trace_id: Option<String>,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub status: SpanStatus,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub error: Option<SpanError>,
    pub metadata: Option<Metadata>,
}

impl ExecutionSpan {
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }

    /// Trace grouping key: the trace id, or the correlation id when absent.
    pub fn trace_key(&self) -> &str {
        self.trace_id.as_deref().unwrap_or(&self.correlation_id)
    }
}
