//! Error types
//!
//! `RelayError` is the engine-level taxonomy. Each variant maps to exactly one
//! HTTP status at the handler boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::producer::ProducerError;

/// Result alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error type for relay engine operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Stream name does not match `[a-z0-9-]+`
    #[error("invalid stream name: {0:?}")]
    InvalidStreamName(String),

    /// Name is well-formed but not configured
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    /// The producer could not be started for this stream
    #[error("producer failed to start for {stream}: {source}")]
    ProducerStartFailed {
        stream: String,
        #[source]
        source: ProducerError,
    },

    /// The producer failed while running
    #[error("producer error on {stream}: {message}")]
    ProducerRuntimeError { stream: String, message: String },

    /// The HTTP client went away
    #[error("client disconnected")]
    ClientDisconnected,

    /// The relay buffer was closed before the read completed
    #[error("relay buffer closed")]
    BufferClosed,

    /// The reader fell too far behind and was evicted
    #[error("subscriber evicted after lagging {lag} bytes behind the producer")]
    Lagged { lag: u64 },

    /// The session is stopping or failed and accepts no new subscribers
    #[error("session for {0} is shutting down")]
    SessionRetired(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// HTTP status for this error at the handler boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidStreamName(_) | RelayError::UnknownStream(_) => {
                StatusCode::NOT_FOUND
            }
            RelayError::ProducerStartFailed { .. } | RelayError::SessionRetired(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match status {
            StatusCode::NOT_FOUND => "Not Found".to_string(),
            _ => self.to_string(),
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::InvalidStreamName("Bad".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::UnknownStream("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::ProducerStartFailed {
                stream: "x".into(),
                source: ProducerError::Start("no streams".into()),
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RelayError::BufferClosed.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_runtime_error_message() {
        let err = RelayError::ProducerRuntimeError {
            stream: "nasatv".into(),
            message: "upstream returned 500".into(),
        };
        assert_eq!(err.to_string(), "producer error on nasatv: upstream returned 500");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_start_failure_message_includes_reason() {
        let err = RelayError::ProducerStartFailed {
            stream: "nasatv".into(),
            source: ProducerError::Start("no playable streams".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("nasatv"));
        assert!(msg.contains("no playable streams"));
    }
}
