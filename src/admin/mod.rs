//! Read-only dashboard HTTP API.
//!
//! # Routes
//! - `GET /status`: version, uptime, fleet score
//! - `GET /dashboard`: latest snapshot
//! - `GET /dashboard/query`: filtered snapshot (`breaker_name`, `error_code`, `time_window_secs`)
//! - `GET /alerts`: critical and warning breakers
//! - `GET /errors`: error summaries and trends
//! - `GET /traces/tree`, `/traces/summary`, `/traces/export` (optional `trace_id`)
//!
//! # Design Decisions
//! - Served from the latest collected snapshot; requests never recompute it
//! - No authentication: the API is read-only and binds to localhost by default

pub mod handlers;
pub mod tracing_layer;

use std::net::SocketAddr;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::handlers::*;
use self::tracing_layer::trace_context_middleware;

#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/dashboard", get(get_dashboard))
        .route("/dashboard/query", get(query_dashboard))
        .route("/alerts", get(get_alerts))
        .route("/errors", get(get_errors))
        .route("/traces/tree", get(get_trace_tree))
        .route("/traces/summary", get(get_trace_summary))
        .route("/traces/export", get(export_traces))
        .layer(middleware::from_fn_with_state(state.clone(), trace_context_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Serve `router` on `listener` until the shutdown broadcast fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
