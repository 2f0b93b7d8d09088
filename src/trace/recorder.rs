//! Span recording and trace reconstruction.
//!
//! # Responsibilities
//! - Allocate root and child execution contexts
//! - Append completed spans to a bounded ring
//! - Rebuild parent/child trees per trace from the flat span list
//! - Summarise and export recorded spans
//!
//! # Design Decisions
//! - `record_span` never fails. An end before the start is clamped to the
//!   start, and an error span without a payload gets `UNKNOWN_ERROR`
//! - Spans whose parent is not (or no longer) recorded become roots, so
//!   out-of-order arrival and ring eviction still produce a usable tree
//! - Spans without a trace id group under their correlation id
//! - Trees are flat arenas built with an explicit work stack, so chain
//!   depth is bounded by memory rather than the thread stack

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::buffer::RingBuffer;
use crate::context::{epoch_millis, ExecutionContext, ExecutionSpan, Metadata, SpanError, SpanStatus};
use crate::observability::metrics;
use crate::resilience::error::OPERATION_FAILED;
use crate::trace::export::{export_spans, ExportedSpan};

/// Code given to error spans recorded without an error payload.
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// One span within a [`TraceTree`].
///
/// `children` are indices into [`TraceTree::nodes`], ordered by start time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanNode {
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub status: SpanStatus,
    pub start_time: u64,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SpanError>,
    /// Distance from this node's root.
    pub depth: usize,
    pub children: Vec<usize>,
}

/// Spans of one trace as a flat arena.
///
/// `nodes` are laid out depth-first from each root, so a parent always
/// precedes its descendants. Nesting depth never grows the stack when the
/// tree is built, serialized or dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceTree {
    pub trace_id: String,
    pub span_count: usize,
    /// Indices into `nodes`, ordered by start time.
    pub roots: Vec<usize>,
    pub nodes: Vec<SpanNode>,
}

impl TraceTree {
    pub fn root_nodes(&self) -> impl Iterator<Item = &SpanNode> {
        self.roots.iter().filter_map(|&idx| self.nodes.get(idx))
    }

    pub fn children<'a>(&'a self, node: &'a SpanNode) -> impl Iterator<Item = &'a SpanNode> {
        node.children.iter().filter_map(|&idx| self.nodes.get(idx))
    }

    /// Number of spans under `nodes[idx]`, including itself.
    pub fn subtree_size(&self, idx: usize) -> usize {
        let mut size = 0;
        let mut pending = vec![idx];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.get(next) {
                size += 1;
                pending.extend(node.children.iter().copied());
            }
        }
        size
    }

    /// Deepest nesting level, zero for a tree of roots only.
    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub operation_name: String,
    pub count: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub average_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSummary {
    pub total_spans: usize,
    pub total_traces: usize,
    pub success_spans: usize,
    pub error_spans: usize,
    pub timeout_spans: usize,
    pub error_rate: f64,
    pub average_duration_ms: f64,
    /// Sorted by count, descending.
    pub operations: Vec<OperationStats>,
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Records spans against execution contexts.
#[derive(Debug)]
pub struct TraceRecorder {
    spans: Mutex<RingBuffer<ExecutionSpan>>,
}

impl TraceRecorder {
    pub fn new(span_capacity: usize) -> Self {
        Self {
            spans: Mutex::new(RingBuffer::new(span_capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingBuffer<ExecutionSpan>> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh root context.
    pub fn create_context(&self, metadata: Option<Metadata>) -> ExecutionContext {
        ExecutionContext::root(metadata.unwrap_or_default())
    }

    pub fn create_child_context(&self, parent: &ExecutionContext) -> ExecutionContext {
        parent.child()
    }

    /// Append one span. Never fails; see the module docs for how
    /// inconsistent input is normalised.
    #[allow(clippy::too_many_arguments)]
    pub fn record_span(
        &self,
        context: &ExecutionContext,
        operation_name: impl Into<String>,
        status: SpanStatus,
        start_time: SystemTime,
        end_time: SystemTime,
        error: Option<SpanError>,
        metadata: Option<Metadata>,
    ) -> ExecutionSpan {
        let operation_name = operation_name.into();
        let end_time = if end_time < start_time {
            tracing::debug!(operation = %operation_name, "Span ended before it started, clamping");
            start_time
        } else {
            end_time
        };
        let error = match (status, error) {
            (SpanStatus::Error, None) => Some(SpanError::new(UNKNOWN_ERROR, "error recorded without details")),
            (_, error) => error,
        };

        let span = ExecutionSpan {
            correlation_id: context.correlation_id.clone(),
            trace_id: context.trace_id.clone(),
            span_id: context.span_id.clone(),
            parent_span_id: context.parent_span_id.clone(),
            operation_name,
            status,
            start_time,
            end_time,
            error,
            metadata,
        };
        tracing::trace!(
            operation = %span.operation_name,
            span_id = %span.span_id,
            status = %span.status,
            "Span recorded"
        );
        metrics::record_span(status);
        self.lock().push(span.clone());
        span
    }

    /// Time `future`, record it as a span, and hand back its output.
    ///
    /// `Err` outputs are recorded as `error` spans with code `OPERATION_FAILED`.
    pub async fn instrument<F, T, E>(&self, context: &ExecutionContext, operation_name: &str, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.instrument_with(context, operation_name, future, |result| match result {
            Ok(_) => (SpanStatus::Success, None),
            Err(e) => (SpanStatus::Error, Some(SpanError::new(OPERATION_FAILED, e.to_string()))),
        })
        .await
    }

    /// Like [`instrument`](Self::instrument) with a caller-supplied
    /// classification of the output.
    pub async fn instrument_with<F, O, C>(
        &self,
        context: &ExecutionContext,
        operation_name: &str,
        future: F,
        classify: C,
    ) -> O
    where
        F: Future<Output = O>,
        C: FnOnce(&O) -> (SpanStatus, Option<SpanError>),
    {
        let start = SystemTime::now();
        let output = future.await;
        let end = SystemTime::now();
        let (status, error) = classify(&output);
        self.record_span(context, operation_name, status, start, end, error, None);
        output
    }

    pub fn spans(&self) -> Vec<ExecutionSpan> {
        self.lock().to_vec()
    }

    /// Spans whose trace key (trace id, else correlation id) is `trace_id`.
    pub fn spans_for_trace(&self, trace_id: &str) -> Vec<ExecutionSpan> {
        self.lock()
            .iter()
            .filter(|s| s.trace_key() == trace_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// One tree per trace, in order of each trace's first recorded span.
    pub fn get_trace_tree(&self) -> Vec<TraceTree> {
        let spans = self.spans();
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<&ExecutionSpan>> = HashMap::new();
        for span in &spans {
            let key = span.trace_key();
            groups
                .entry(key)
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(span);
        }

        order
            .into_iter()
            .map(|key| {
                let group = groups.remove(key).unwrap_or_default();
                build_tree(key, &group)
            })
            .collect()
    }

    pub fn get_trace_summary(&self) -> TraceSummary {
        let spans = self.lock();
        let total_spans = spans.len();
        let traces: HashSet<&str> = spans.iter().map(ExecutionSpan::trace_key).collect();

        let mut success_spans = 0;
        let mut error_spans = 0;
        let mut timeout_spans = 0;
        let mut total_ms = 0.0;
        let mut by_operation: BTreeMap<&str, OperationStats> = BTreeMap::new();

        for span in spans.iter() {
            let ms = millis(span.duration());
            total_ms += ms;
            let stats = by_operation
                .entry(span.operation_name.as_str())
                .or_insert_with(|| OperationStats {
                    operation_name: span.operation_name.clone(),
                    count: 0,
                    errors: 0,
                    timeouts: 0,
                    average_duration_ms: 0.0,
                    max_duration_ms: 0.0,
                });
            stats.count += 1;
            // Running total; divided into an average below.
            stats.average_duration_ms += ms;
            stats.max_duration_ms = stats.max_duration_ms.max(ms);
            match span.status {
                SpanStatus::Success => success_spans += 1,
                SpanStatus::Error => {
                    error_spans += 1;
                    stats.errors += 1;
                }
                SpanStatus::Timeout => {
                    timeout_spans += 1;
                    stats.timeouts += 1;
                }
            }
        }

        let mut operations: Vec<OperationStats> = by_operation
            .into_values()
            .map(|mut stats| {
                stats.average_duration_ms /= stats.count as f64;
                stats
            })
            .collect();
        operations.sort_by(|a, b| b.count.cmp(&a.count));

        let (error_rate, average_duration_ms) = if total_spans == 0 {
            (0.0, 0.0)
        } else {
            (
                (error_spans + timeout_spans) as f64 / total_spans as f64,
                total_ms / total_spans as f64,
            )
        };

        TraceSummary {
            total_spans,
            total_traces: traces.len(),
            success_spans,
            error_spans,
            timeout_spans,
            error_rate,
            average_duration_ms,
            operations,
        }
    }

    pub fn export_spans(&self) -> Vec<ExportedSpan> {
        export_spans(self.lock().iter())
    }
}

fn build_tree(trace_id: &str, group: &[&ExecutionSpan]) -> TraceTree {
    let ids: HashSet<&str> = group.iter().map(|s| s.span_id.as_str()).collect();
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut top = Vec::new();
    for (idx, span) in group.iter().enumerate() {
        match span.parent_span_id.as_deref() {
            Some(parent) if ids.contains(parent) && parent != span.span_id => {
                children.entry(parent).or_default().push(idx)
            }
            _ => top.push(idx),
        }
    }

    let by_start = |a: &usize, b: &usize| group[*a].start_time.cmp(&group[*b].start_time);
    for list in children.values_mut() {
        list.sort_by(by_start);
    }
    top.sort_by(by_start);

    let mut tree = TraceTree {
        trace_id: trace_id.to_string(),
        span_count: group.len(),
        roots: Vec::new(),
        nodes: Vec::with_capacity(group.len()),
    };
    let mut visited = vec![false; group.len()];

    // Parent cycles leave spans unreachable from any root; they start
    // trees of their own after the regular roots.
    let starts: Vec<usize> = top.into_iter().chain(0..group.len()).collect();
    for start in starts {
        if visited[start] {
            continue;
        }
        // (span index, parent node index, depth)
        let mut pending: Vec<(usize, Option<usize>, usize)> = vec![(start, None, 0)];
        while let Some((idx, parent, depth)) = pending.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;

            let node_idx = tree.nodes.len();
            let span = group[idx];
            tree.nodes.push(SpanNode {
                span_id: span.span_id.clone(),
                parent_span_id: span.parent_span_id.clone(),
                operation_name: span.operation_name.clone(),
                status: span.status,
                start_time: epoch_millis(span.start_time),
                duration_ms: millis(span.duration()),
                error: span.error.clone(),
                depth,
                children: Vec::new(),
            });
            match parent.and_then(|p| tree.nodes.get_mut(p)) {
                Some(parent) => parent.children.push(node_idx),
                None => tree.roots.push(node_idx),
            }

            if let Some(kids) = children.get(span.span_id.as_str()) {
                // Reversed so the earliest child is visited first.
                for &kid in kids.iter().rev() {
                    if !visited[kid] {
                        pending.push((kid, Some(node_idx), depth + 1));
                    }
                }
            }
        }
    }

    let nodes = &tree.nodes;
    tree.roots.sort_by_key(|&idx| nodes[idx].start_time);
    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(1_000_000 + ms)
    }

    fn record(recorder: &TraceRecorder, ctx: &ExecutionContext, name: &str, start: u64, end: u64) {
        recorder.record_span(ctx, name, SpanStatus::Success, at(start), at(end), None, None);
    }

    #[test]
    fn test_child_context_shares_trace() {
        let recorder = TraceRecorder::new(8);
        let parent = recorder.create_context(None);
        let child = recorder.create_child_context(&parent);
        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.parent_span_id.as_ref(), Some(&parent.span_id));
        assert_ne!(child.span_id, parent.span_id);
    }

    #[test]
    fn test_record_span_normalises_bad_input() {
        let recorder = TraceRecorder::new(8);
        let ctx = recorder.create_context(None);

        let clamped = recorder.record_span(&ctx, "op", SpanStatus::Success, at(50), at(10), None, None);
        assert_eq!(clamped.end_time, clamped.start_time);
        assert_eq!(clamped.duration(), Duration::ZERO);

        let errored = recorder.record_span(&ctx, "op", SpanStatus::Error, at(0), at(1), None, None);
        assert_eq!(errored.error.map(|e| e.code).as_deref(), Some(UNKNOWN_ERROR));
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_span_ring_is_bounded() {
        let recorder = TraceRecorder::new(3);
        let ctx = recorder.create_context(None);
        for i in 0..5 {
            record(&recorder, &ctx, &format!("op-{i}"), i, i + 1);
        }
        let names: Vec<_> = recorder.spans().into_iter().map(|s| s.operation_name).collect();
        assert_eq!(names, vec!["op-2", "op-3", "op-4"]);
    }

    #[test]
    fn test_trace_tree_links_children() {
        let recorder = TraceRecorder::new(32);
        let root = recorder.create_context(None);
        let a = recorder.create_child_context(&root);
        let b = recorder.create_child_context(&root);
        let a1 = recorder.create_child_context(&a);

        // Out-of-order arrival.
        record(&recorder, &a1, "a1", 2, 3);
        record(&recorder, &b, "b", 5, 6);
        record(&recorder, &a, "a", 1, 4);
        record(&recorder, &root, "root", 0, 10);

        let other = recorder.create_context(None);
        record(&recorder, &other, "other", 0, 1);

        let trees = recorder.get_trace_tree();
        assert_eq!(trees.len(), 2);
        let tree = &trees[0];
        assert_eq!(Some(&tree.trace_id), root.trace_id.as_ref());
        assert_eq!(tree.span_count, 4);
        assert_eq!(tree.roots.len(), 1);

        let top = tree.root_nodes().next().unwrap();
        assert_eq!(top.operation_name, "root");
        let kids: Vec<_> = tree.children(top).map(|c| c.operation_name.as_str()).collect();
        assert_eq!(kids, vec!["a", "b"]);
        let a = tree.children(top).next().unwrap();
        assert_eq!(tree.children(a).next().unwrap().operation_name, "a1");
        assert_eq!(tree.subtree_size(tree.roots[0]), 4);
        assert_eq!(tree.max_depth(), 2);

        let order: Vec<_> = tree.nodes.iter().map(|n| n.operation_name.as_str()).collect();
        assert_eq!(order, vec!["root", "a", "a1", "b"]);
    }

    #[test]
    fn test_orphans_become_roots() {
        let recorder = TraceRecorder::new(32);
        let root = recorder.create_context(None);
        let child = recorder.create_child_context(&root);
        let grandchild = recorder.create_child_context(&child);
        record(&recorder, &grandchild, "grandchild", 2, 3);
        record(&recorder, &root, "root", 0, 5);

        let trees = recorder.get_trace_tree();
        assert_eq!(trees.len(), 1);
        let names: Vec<_> = trees[0].root_nodes().map(|n| n.operation_name.as_str()).collect();
        assert_eq!(names, vec!["root", "grandchild"]);
    }

    #[test]
    fn test_parent_cycle_still_reported() {
        let recorder = TraceRecorder::new(8);
        let base = recorder.create_context(None);
        let mut x = base.child();
        let mut y = base.child();
        x.parent_span_id = Some(y.span_id.clone());
        y.parent_span_id = Some(x.span_id.clone());
        record(&recorder, &x, "x", 0, 1);
        record(&recorder, &y, "y", 1, 2);

        let trees = recorder.get_trace_tree();
        let total: usize = trees[0].roots.iter().map(|&idx| trees[0].subtree_size(idx)).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_deep_parent_chain_builds_without_recursion() {
        let capacity = 10_000;
        let recorder = TraceRecorder::new(capacity);
        let mut ctx = recorder.create_context(None);
        for i in 0..capacity as u64 {
            record(&recorder, &ctx, "hop", i, i + 1);
            ctx = recorder.create_child_context(&ctx);
        }

        let trees = recorder.get_trace_tree();
        assert_eq!(trees.len(), 1);
        let tree = &trees[0];
        assert_eq!(tree.span_count, capacity);
        assert_eq!(tree.roots, vec![0]);
        assert_eq!(tree.max_depth(), capacity - 1);
        assert_eq!(tree.subtree_size(0), capacity);

        let json = serde_json::to_string(&trees).unwrap();
        assert!(json.contains("\"depth\":9999"));
        drop(trees);
    }

    #[test]
    fn test_summary_counts() {
        let recorder = TraceRecorder::new(32);
        let ctx = recorder.create_context(None);
        record(&recorder, &ctx, "fetch", 0, 10);
        record(&recorder, &ctx, "fetch", 0, 30);
        recorder.record_span(&ctx, "save", SpanStatus::Timeout, at(0), at(5), None, None);
        recorder.record_span(
            &ctx,
            "fetch",
            SpanStatus::Error,
            at(0),
            at(20),
            Some(SpanError::new("E", "bad")),
            None,
        );

        let summary = recorder.get_trace_summary();
        assert_eq!(summary.total_spans, 4);
        assert_eq!(summary.total_traces, 1);
        assert_eq!(summary.error_spans, 1);
        assert_eq!(summary.timeout_spans, 1);
        assert_eq!(summary.error_rate, 0.5);

        let fetch = &summary.operations[0];
        assert_eq!(fetch.operation_name, "fetch");
        assert_eq!(fetch.count, 3);
        assert_eq!(fetch.errors, 1);
        assert_eq!(fetch.average_duration_ms, 20.0);
        assert_eq!(fetch.max_duration_ms, 30.0);
    }

    #[tokio::test]
    async fn test_instrument_records_outcome() {
        let recorder = TraceRecorder::new(8);
        let ctx = recorder.create_context(None);

        let ok: Result<u32, String> = recorder.instrument(&ctx, "ok", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        let err: Result<u32, String> = recorder.instrument(&ctx, "bad", async { Err("nope".to_string()) }).await;
        assert!(err.is_err());

        let spans = recorder.spans();
        assert_eq!(spans[0].status, SpanStatus::Success);
        assert_eq!(spans[1].status, SpanStatus::Error);
        assert_eq!(spans[1].error.as_ref().map(|e| e.message.as_str()), Some("nope"));
        assert_eq!(recorder.spans_for_trace(ctx.trace_id.as_deref().unwrap()).len(), 2);

        recorder.clear();
        assert!(recorder.is_empty());
    }
}
