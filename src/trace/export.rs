//! Span export in the flat shape Jaeger-style viewers import.
//!
//! `startTime` is epoch milliseconds and `duration` is microseconds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::{epoch_millis, ExecutionSpan, SpanStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLog {
    pub timestamp: u64,
    pub event: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedSpan {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    #[serde(rename = "parentSpanID")]
    pub parent_span_id: Option<String>,
    #[serde(rename = "operationName")]
    pub operation_name: String,
    #[serde(rename = "startTime")]
    pub start_time: u64,
    pub duration: u64,
    pub tags: BTreeMap<String, serde_json::Value>,
    pub logs: Vec<SpanLog>,
}

impl From<&ExecutionSpan> for ExportedSpan {
    fn from(span: &ExecutionSpan) -> Self {
        let mut tags: BTreeMap<String, serde_json::Value> = span
            .metadata
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        tags.insert("correlationId".into(), span.correlation_id.clone().into());
        tags.insert("status".into(), span.status.as_str().into());

        let mut logs = Vec::new();
        if let Some(error) = &span.error {
            tags.insert("error".into(), true.into());
            tags.insert("error.code".into(), error.code.clone().into());
            if let Some(stack) = &error.stack {
                tags.insert("error.stack".into(), stack.clone().into());
            }
            logs.push(SpanLog {
                timestamp: epoch_millis(span.end_time),
                event: "error".into(),
                message: error.message.clone(),
            });
        } else if span.status == SpanStatus::Timeout {
            logs.push(SpanLog {
                timestamp: epoch_millis(span.end_time),
                event: "timeout".into(),
                message: format!("{} timed out", span.operation_name),
            });
        }

        Self {
            trace_id: span.trace_key().to_string(),
            span_id: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            operation_name: span.operation_name.clone(),
            start_time: epoch_millis(span.start_time),
            duration: span.duration().as_micros() as u64,
            tags,
            logs,
        }
    }
}

pub fn export_spans<'a>(spans: impl IntoIterator<Item = &'a ExecutionSpan>) -> Vec<ExportedSpan> {
    spans.into_iter().map(ExportedSpan::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Metadata, SpanError};
    use std::time::{Duration, UNIX_EPOCH};

    fn span(status: SpanStatus, error: Option<SpanError>) -> ExecutionSpan {
        let start = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);
        let mut metadata = Metadata::new();
        metadata.insert("dependency".into(), "search".into());
        ExecutionSpan {
            correlation_id: "corr-1".into(),
            trace_id: Some("trace-1".into()),
            span_id: "span-2".into(),
            parent_span_id: Some("span-1".into()),
            operation_name: "search.query".into(),
            status,
            start_time: start,
            end_time: start + Duration::from_micros(2_500),
            error,
            metadata: Some(metadata),
        }
    }

    #[test]
    fn test_wire_field_names_and_units() {
        let exported = ExportedSpan::from(&span(SpanStatus::Success, None));
        let json = serde_json::to_value(&exported).unwrap();

        assert_eq!(json["traceID"], "trace-1");
        assert_eq!(json["spanID"], "span-2");
        assert_eq!(json["parentSpanID"], "span-1");
        assert_eq!(json["operationName"], "search.query");
        assert_eq!(json["startTime"], 1_700_000_000_000u64);
        assert_eq!(json["duration"], 2_500);
        assert_eq!(json["tags"]["dependency"], "search");
        assert_eq!(json["tags"]["status"], "success");
        assert!(json["logs"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_error_span_carries_log_entry() {
        let error = SpanError::new("OPERATION_FAILED", "connection refused").with_stack("at probe");
        let exported = ExportedSpan::from(&span(SpanStatus::Error, Some(error)));

        assert_eq!(exported.tags["error"], true);
        assert_eq!(exported.tags["error.code"], "OPERATION_FAILED");
        assert_eq!(exported.tags["error.stack"], "at probe");
        assert_eq!(exported.logs.len(), 1);
        assert_eq!(exported.logs[0].event, "error");
        assert_eq!(exported.logs[0].message, "connection refused");
    }

    #[test]
    fn test_missing_trace_id_uses_correlation_id() {
        let mut s = span(SpanStatus::Timeout, None);
        s.trace_id = None;
        s.parent_span_id = None;
        let exported = ExportedSpan::from(&s);
        assert_eq!(exported.trace_id, "corr-1");
        assert!(exported.parent_span_id.is_none());
        assert_eq!(exported.logs[0].event, "timeout");
    }
}
