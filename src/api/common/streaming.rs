use std::convert::Infallible;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::error::RelayError;
use crate::state::AppState;
use crate::stream::StreamTransducer;

#[inline]
pub(crate) fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Open a watched event-stream relay for a 200 `text/event-stream` response.
///
/// Response headers are only produced after the first upstream chunk passed
/// inspection; until then failures are ordinary error responses.
pub(crate) async fn streaming_response(
    state: &AppState,
    response: reqwest::Response,
) -> Result<Response, RelayError> {
    let permit = state
        .stream_gate()
        .try_admit()
        .ok_or(RelayError::ShuttingDown)?;

    let session =
        StreamTransducer::start(response.bytes_stream(), state.stream_settings(), Some(permit))
            .await?;
    tracing::debug!("stream relay started");

    let body = Body::from_stream(session.into_body_stream().map(Ok::<Bytes, Infallible>));
    Ok(sse_ok_response(body))
}
