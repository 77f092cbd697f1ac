use axum::response::{IntoResponse, Response};
use http::StatusCode;

/// Error type surfaced by the relay pipeline.
///
/// Every variant maps to a plain-text client response. Once a stream has started
/// relaying, failures no longer become a `RelayError`; the transducer closes the
/// stream instead.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Missing target URL")]
    MissingTarget,
    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),
    #[error("Unknown service: {0}")]
    UnknownService(String),
    #[error("Request body too large (max {0} bytes)")]
    PayloadTooLarge(usize),
    #[error("Fetch Error: {0}")]
    UpstreamFetch(String),
    #[error("Empty Response")]
    EmptyResponse,
    #[error("Empty Stream")]
    EmptyStream,
    #[error("Stream Closed Immediately")]
    StreamClosedImmediately,
    #[error("Empty Content After Filter")]
    EmptyContentAfterFilter,
    #[error("Service Shutting Down")]
    ShuttingDown,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingTarget | RelayError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            RelayError::UnknownService(_) => StatusCode::NOT_FOUND,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::UpstreamFetch(_) | RelayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RelayError::EmptyResponse
            | RelayError::EmptyStream
            | RelayError::StreamClosedImmediately
            | RelayError::EmptyContentAfterFilter
            | RelayError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Upstream produced nothing usable; callers may retry at a higher layer.
    #[must_use]
    pub fn is_empty_upstream(&self) -> bool {
        matches!(
            self,
            RelayError::EmptyResponse
                | RelayError::EmptyStream
                | RelayError::StreamClosedImmediately
                | RelayError::EmptyContentAfterFilter
        )
    }

    fn client_message(&self) -> String {
        match self {
            // details stay in the logs
            RelayError::Internal(_) => "Internal Error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, self.client_message()).into_response();
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}
