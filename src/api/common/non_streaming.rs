use axum::body::Body;
use axum::response::Response;

use crate::api::common::passthrough::scrub_framing_headers;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::sanitize::sanitize_buffered;

/// Buffer a 200 response, strip the sentinel, and rebuild it.
///
/// `content-length` is always dropped since the body may have shrunk.
pub(crate) async fn sanitized_response(
    response: reqwest::Response,
    relay: &RelayConfig,
) -> Result<Response, RelayError> {
    let status = response.status();
    let mut headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| RelayError::UpstreamFetch(format!("Failed to read response body: {e}")))?;

    let body = sanitize_buffered(body, &relay.sentinel, relay.fallback_sentinel_policy)?;
    scrub_framing_headers(&mut headers);

    let mut sanitized = Response::new(Body::from(body));
    *sanitized.status_mut() = status;
    *sanitized.headers_mut() = headers;
    Ok(sanitized)
}
