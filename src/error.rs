//! Error types for trae-proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for trae-proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for trae-proxy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream request failed: {0}")]
    UpstreamUnavailable(#[from] reqwest::Error),

    #[error("Upstream status: {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("Failed to read upstream stream: {0}")]
    StreamRead(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status surfaced to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Config(_)
            | Error::UpstreamUnavailable(_)
            | Error::UpstreamRejected { .. }
            | Error::StreamRead(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Plain-text body; OpenAI error envelopes are not used here.
        (self.status_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_is_bad_request() {
        let err = Error::InvalidRequest("no messages".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upstream_rejected_is_internal_error() {
        let err = Error::UpstreamRejected {
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Upstream status: 401: unauthorized");
    }

    #[test]
    fn test_stream_read_is_internal_error() {
        let err = Error::StreamRead("connection reset".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
