//! HTTP trace header propagation.
//!
//! Header names on the wire are `X-Correlation-ID`, `X-Trace-ID`,
//! `X-Span-ID` and `X-Parent-Span-ID`. Header lookups are case-insensitive,
//! so they are declared here in the lowercase form `http` requires.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::context::{ids, now_millis, ExecutionContext, Metadata};
use crate::trace::recorder::TraceRecorder;

pub const CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
pub const TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");
pub const SPAN_ID: HeaderName = HeaderName::from_static("x-span-id");
pub const PARENT_SPAN_ID: HeaderName = HeaderName::from_static("x-parent-span-id");

/// Identifier fields read from request headers; any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTraceContext {
    pub correlation_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
}

impl ExtractedTraceContext {
    pub fn is_empty(&self) -> bool {
        self.correlation_id.is_none()
            && self.trace_id.is_none()
            && self.span_id.is_none()
            && self.parent_span_id.is_none()
    }

    /// The sender's context, if it sent enough to identify one.
    pub fn to_context(&self) -> Option<ExecutionContext> {
        Some(ExecutionContext {
            correlation_id: self.correlation_id.clone()?,
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone()?,
            parent_span_id: self.parent_span_id.clone(),
            metadata: Metadata::new(),
            timestamp: now_millis(),
        })
    }

    /// Context for work done on this side of the hop.
    ///
    /// With a sender span the result is its child. With only correlation or
    /// trace ids those ids are kept on a new root span. With nothing a fresh
    /// root is started.
    pub fn continue_trace(&self, recorder: &TraceRecorder) -> ExecutionContext {
        if let Some(parent) = self.to_context() {
            return recorder.create_child_context(&parent);
        }
        if self.is_empty() {
            return recorder.create_context(None);
        }
        ExecutionContext {
            correlation_id: self.correlation_id.clone().unwrap_or_else(ids::correlation_id),
            trace_id: Some(self.trace_id.clone().unwrap_or_else(ids::trace_id)),
            span_id: ids::span_id(),
            parent_span_id: self.span_id.clone(),
            metadata: Metadata::new(),
            timestamp: now_millis(),
        }
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "Skipping trace header with invalid value"),
    }
}

/// Headers carrying `context` to the next hop.
pub fn get_trace_headers(context: &ExecutionContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, CORRELATION_ID, &context.correlation_id);
    if let Some(trace_id) = &context.trace_id {
        insert(&mut headers, TRACE_ID, trace_id);
    }
    insert(&mut headers, SPAN_ID, &context.span_id);
    if let Some(parent) = &context.parent_span_id {
        insert(&mut headers, PARENT_SPAN_ID, parent);
    }
    headers
}

fn read(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Inverse of [`get_trace_headers`]. Missing or unreadable headers yield `None`.
pub fn extract_trace_context(headers: &HeaderMap) -> ExtractedTraceContext {
    ExtractedTraceContext {
        correlation_id: read(headers, &CORRELATION_ID),
        trace_id: read(headers, &TRACE_ID),
        span_id: read(headers, &SPAN_ID),
        parent_span_id: read(headers, &PARENT_SPAN_ID),
    }
}
