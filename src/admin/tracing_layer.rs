//! Trace context middleware for the admin API.
//!
//! Continues the caller's trace from the `X-*-ID` headers (or starts one),
//! keeps the context in the store for the duration of the request, records
//! one span per request and echoes the server-side ids back as headers.

use std::time::SystemTime;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::admin::handlers::AdminState;
use crate::context::{Metadata, SpanError, SpanStatus};
use crate::trace::{extract_trace_context, get_trace_headers};

pub async fn trace_context_middleware(State(state): State<AdminState>, mut request: Request<Body>, next: Next) -> Response {
    let extracted = extract_trace_context(request.headers());
    let context = extracted.continue_trace(&state.recorder);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.contexts.set(context.clone());
    request.extensions_mut().insert(context.clone());

    let started = SystemTime::now();
    let mut response = next.run(request).await;
    let ended = SystemTime::now();

    let status = response.status();
    let (span_status, error) = if status.is_server_error() {
        (
            SpanStatus::Error,
            Some(SpanError::new(format!("HTTP_{}", status.as_u16()), status.to_string())),
        )
    } else {
        (SpanStatus::Success, None)
    };

    let mut metadata = Metadata::new();
    metadata.insert("http.method".into(), method.as_str().into());
    metadata.insert("http.path".into(), path.clone().into());
    metadata.insert("http.status".into(), status.as_u16().into());
    state.recorder.record_span(
        &context,
        format!("{} {}", method, path),
        span_status,
        started,
        ended,
        error,
        Some(metadata),
    );
    state.contexts.clear_context(&context);

    response.headers_mut().extend(get_trace_headers(&context));
    response
}
