//! Classifier error handling.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by sentiment backends.
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// The backend cannot be loaded or reached, or refused the credentials.
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// The remote service asked us to slow down.
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Delay suggested by the `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },

    /// The request did not complete within the timeout.
    #[error("Classifier request timed out")]
    Timeout,

    /// A transient failure persisted past the retry ceiling.
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, the first one included.
        attempts: u32,
        /// Error from the final attempt.
        last: Box<ClassifierError>,
    },

    /// The service answered with an unexpected status.
    #[error("Classifier API request failed: {0}")]
    ApiRequestFailed(String),

    /// The service answered with a body we could not interpret.
    #[error("Invalid response format from classifier: {0}")]
    InvalidResponseFormat(String),

    /// Any other transport failure.
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl ClassifierError {
    /// Whether the failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout)
    }

    /// Delay requested by the server, if it sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClassifierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ClassifierUnavailable(format!("cannot reach classifier service: {err}"))
        } else if err.is_decode() {
            Self::InvalidResponseFormat(err.to_string())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}
