//! Error types for the remote sink.

use thiserror::Error;

/// Delivery failures that leave the record pending for a later cycle.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Transport failure: DNS, connect, TLS, or timeout.
    #[error("Sink unreachable: {0}")]
    Unreachable(String),

    /// The endpoint answered with a server error.
    #[error("Sink unavailable: HTTP {status}")]
    Unavailable { status: u16, body: String },

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl SinkError {
    /// Whether the failure is worth retrying on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Unavailable { .. })
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unreachable(format!("request timed out: {err}"))
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;
