use axum::body::Body;
use axum::response::Response;
use http::HeaderMap;

/// Drop body-framing headers; hyper recomputes them for the client hop.
pub(crate) fn scrub_framing_headers(headers: &mut HeaderMap) {
    headers.remove(http::header::CONTENT_LENGTH);
    headers.remove(http::header::TRANSFER_ENCODING);
}

/// Relay an upstream response untouched: status, headers and a live body.
pub(crate) fn passthrough_response(response: reqwest::Response, scrub_framing: bool) -> Response {
    let status = response.status();
    let mut headers = response.headers().clone();
    if scrub_framing {
        scrub_framing_headers(&mut headers);
    }

    let body = Body::from_stream(response.bytes_stream());
    let mut passthrough = Response::new(body);
    *passthrough.status_mut() = status;
    *passthrough.headers_mut() = headers;
    passthrough
}
