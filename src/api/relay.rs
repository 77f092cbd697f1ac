use axum::response::Response;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::api::common::non_streaming::sanitized_response;
use crate::api::common::passthrough::passthrough_response;
use crate::api::common::streaming::streaming_response;
use crate::error::RelayError;
use crate::routing::resolve_target;
use crate::state::AppState;
use crate::transport::OutboundRequest;

/// How an upstream response is handed back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseRoute {
    Passthrough,
    Buffered,
    Streaming,
}

/// Pick the response path. Only a 200 with a body is ever transformed.
#[must_use]
pub(crate) fn classify_response(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
) -> ResponseRoute {
    if status != StatusCode::OK || *method == Method::HEAD {
        return ResponseRoute::Passthrough;
    }
    let is_event_stream = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("text/event-stream"));
    if is_event_stream {
        ResponseRoute::Streaming
    } else {
        ResponseRoute::Buffered
    }
}

/// Inbound request after the base path has been removed.
pub(crate) struct InboundRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: Bytes,
}

/// Resolve, forward, and relay one request.
///
/// # Errors
///
/// Any [`RelayError`] raised before response headers reach the client.
pub(crate) async fn relay_request(
    state: &AppState,
    inbound: InboundRequest<'_>,
) -> Result<Response, RelayError> {
    let target = resolve_target(state.services(), inbound.path, inbound.query)?;
    tracing::debug!(
        target = %target.as_str(),
        origin = %target.origin(),
        "resolved upstream target"
    );

    let relay = &state.config.relay;
    let method = inbound.method;
    let outbound = OutboundRequest::new(
        method.clone(),
        &target,
        inbound.headers,
        inbound.body,
        relay,
    );
    let response = state.transport.send(outbound).await?;

    let route = classify_response(&method, response.status(), response.headers());
    tracing::debug!(status = response.status().as_u16(), ?route, "upstream responded");
    match route {
        ResponseRoute::Passthrough => Ok(passthrough_response(
            response,
            relay.scrub_passthrough_framing_headers,
        )),
        ResponseRoute::Buffered => sanitized_response(response, relay).await,
        ResponseRoute::Streaming => streaming_response(state, response).await,
    }
}
