use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::FutureExt;
use tracing::Instrument;

use crate::api::relay::{relay_request, InboundRequest};
use crate::error::RelayError;
use crate::state::AppState;
use crate::transport::method_carries_body;

/// Dispatch a raw HTTP request through the relay.
///
/// Every failure is turned into a response here, so the connection task never
/// sees an error.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let request_seq = state.next_request_seq();
    let span = tracing::info_span!(
        "relay",
        request_id = %state.request_id(request_seq),
        method = %request.method(),
    );
    let response = handle_request(state, base_path, request)
        .instrument(span)
        .await;
    Ok(response)
}

async fn handle_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let Some(path) = strip_base_path(parts.uri.path(), base_path.as_ref()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let body_bytes = if method_carries_body(&parts.method) {
        match read_request_body(body, state.config.server.max_request_body_bytes).await {
            Ok(bytes) => bytes,
            Err(err) => return error_response(err),
        }
    } else {
        Bytes::new()
    };

    let inbound = InboundRequest {
        method: parts.method.clone(),
        path,
        query: parts.uri.query(),
        headers: &parts.headers,
        body: body_bytes,
    };

    let outcome = AssertUnwindSafe(relay_request(&state, inbound))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => error_response(err),
        Err(panic) => error_response(RelayError::Internal(panic_message(panic.as_ref()))),
    }
}

fn error_response(err: RelayError) -> Response {
    match &err {
        RelayError::UpstreamFetch(_) | RelayError::Internal(_) => {
            tracing::error!(status = err.status_code().as_u16(), error = %err, "request failed");
        }
        _ if err.is_empty_upstream() => {
            tracing::warn!(status = err.status_code().as_u16(), error = %err, "empty upstream reply");
        }
        _ => {
            tracing::warn!(status = err.status_code().as_u16(), error = %err, "request rejected");
        }
    }
    err.into_response()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body, limit: usize) -> Result<Bytes, RelayError> {
    body::to_bytes(body, limit)
        .await
        .map_err(|_| RelayError::PayloadTooLarge(limit))
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}
