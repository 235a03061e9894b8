//! Query error taxonomy.

use http::StatusCode;

/// Errors a query or mutation function can fail with.
///
/// The variant decides retry behavior: client errors and undecodable
/// payloads are terminal, network and server errors are transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// 4xx response. Never retried.
    #[error("client error {status}: {message}")]
    Client { status: StatusCode, message: String },

    /// 5xx response.
    #[error("server error {status}: {message}")]
    Server { status: StatusCode, message: String },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The request was aborted by its owner.
    #[error("request cancelled")]
    Cancelled,
}

impl QueryError {
    /// Classify an HTTP error status.
    ///
    /// Statuses outside 4xx are treated as server errors, since the caller
    /// only reaches this for non-success responses.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match StatusCode::from_u16(status) {
            Ok(status) if status.is_client_error() => Self::Client { status, message },
            Ok(status) => Self::Server { status, message },
            Err(_) => Self::Server {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("invalid status {}: {}", status, message),
            },
        }
    }

    /// A 4xx-equivalent error.
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client { .. })
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Network(_))
    }

    /// HTTP status, if the error came from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Decode(e.to_string())
    }
}
