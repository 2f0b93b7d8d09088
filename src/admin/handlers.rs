use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::dashboard::{Alerts, DashboardQuery, DashboardQueryService, DashboardSnapshot, ErrorSummary, ErrorTrend, QueryResult};
use crate::trace::{ExportedSpan, TraceContextStore, TraceRecorder, TraceSummary, TraceTree};

/// Shared state injected into admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub query: Arc<DashboardQueryService>,
    pub recorder: Arc<TraceRecorder>,
    pub contexts: Arc<TraceContextStore>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(
        query: Arc<DashboardQueryService>,
        recorder: Arc<TraceRecorder>,
        contexts: Arc<TraceContextStore>,
    ) -> Self {
        Self {
            query,
            recorder,
            contexts,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub breakers: usize,
    pub system_health_score: f64,
    pub recorded_spans: usize,
    pub active_contexts: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQueryParams {
    pub breaker_name: Option<String>,
    pub error_code: Option<String>,
    pub time_window_secs: Option<u64>,
}

impl From<DashboardQueryParams> for DashboardQuery {
    fn from(params: DashboardQueryParams) -> Self {
        DashboardQuery {
            breaker_name: params.breaker_name,
            error_code: params.error_code,
            time_window: params.time_window_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TraceParams {
    pub trace_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorReport {
    pub total_errors: usize,
    pub summaries: Vec<ErrorSummary>,
    pub trends: Vec<ErrorTrend>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.query.latest();
    let status = if snapshot.critical_breakers > 0 {
        "degraded"
    } else {
        "operational"
    };
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: status.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        breakers: snapshot.total_breakers,
        system_health_score: snapshot.system_health_score,
        recorded_spans: state.recorder.len(),
        active_contexts: state.contexts.len(),
    })
}

pub async fn get_dashboard(State(state): State<AdminState>) -> Json<DashboardSnapshot> {
    Json(state.query.latest().as_ref().clone())
}

pub async fn query_dashboard(
    State(state): State<AdminState>,
    Query(params): Query<DashboardQueryParams>,
) -> Json<QueryResult> {
    Json(state.query.query(&params.into()))
}

pub async fn get_alerts(State(state): State<AdminState>) -> Json<Alerts> {
    Json(state.query.get_alerts())
}

pub async fn get_errors(State(state): State<AdminState>) -> Json<ErrorReport> {
    let snapshot = state.query.latest();
    Json(ErrorReport {
        total_errors: snapshot.total_errors,
        summaries: snapshot.error_summaries.clone(),
        trends: state.query.trends(),
    })
}

pub async fn get_trace_tree(
    State(state): State<AdminState>,
    Query(params): Query<TraceParams>,
) -> Json<Vec<TraceTree>> {
    let mut trees = state.recorder.get_trace_tree();
    if let Some(trace_id) = params.trace_id {
        trees.retain(|t| t.trace_id == trace_id);
    }
    Json(trees)
}

pub async fn get_trace_summary(State(state): State<AdminState>) -> Json<TraceSummary> {
    Json(state.recorder.get_trace_summary())
}

pub async fn export_traces(
    State(state): State<AdminState>,
    Query(params): Query<TraceParams>,
) -> Json<Vec<ExportedSpan>> {
    let mut spans = state.recorder.export_spans();
    if let Some(trace_id) = params.trace_id {
        spans.retain(|s| s.trace_id == trace_id);
    }
    Json(spans)
}
