// Error types module

use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for every request that passes through the core.
///
/// The type is `Clone` because a single outcome is shared by every caller
/// deduplicated onto the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The transport could not reach the backend (DNS, connect, reset, offline)
    #[error("network error: {0}")]
    NetworkFailure(String),

    /// A single attempt exceeded its timeout
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The backend answered with a non-success status
    #[error("HTTP {status}")]
    HttpError { status: u16, body: String },

    /// A successful response body could not be decoded
    #[error("failed to parse response: {0}")]
    ParseFailure(String),

    /// The caller (or teardown) cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The endpoint's circuit breaker is open; no network call was made
    #[error("circuit breaker open for endpoint '{endpoint}'")]
    CircuitOpen { endpoint: String },

    /// Every allowed attempt failed with a retryable error
    #[error("failed after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        last: Box<RequestError>,
    },

    /// The persistent store could not be read or written
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The request was malformed before anything was sent
    #[error("invalid request: {0}")]
    ValidationFailure(String),
}

impl RequestError {
    /// Whether the retry executor may try the same call again.
    ///
    /// Connectivity failures, timeouts, 5xx, 429 and 408 are retryable.
    /// Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::NetworkFailure(_) | RequestError::Timeout(_) => true,
            RequestError::HttpError { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Whether a queued operation that failed with this error should stay
    /// queued for a later drain.
    ///
    /// Broader than [`is_retryable`](Self::is_retryable): an open circuit and
    /// an exhausted retry loop over a retryable cause are both expected to
    /// clear up with time.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestError::CircuitOpen { .. } => true,
            RequestError::MaxRetriesExceeded { last, .. } => last.is_transient(),
            other => other.is_retryable(),
        }
    }

    /// Whether the error means the backend could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        match self {
            RequestError::NetworkFailure(_) => true,
            RequestError::MaxRetriesExceeded { last, .. } => last.is_connectivity(),
            _ => false,
        }
    }

    /// Number of attempts reported by the error (1 unless retries were exhausted)
    pub fn attempts(&self) -> u32 {
        match self {
            RequestError::MaxRetriesExceeded { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::NetworkFailure(_) => "network_failure",
            RequestError::Timeout(_) => "timeout",
            RequestError::HttpError { .. } => "http_error",
            RequestError::ParseFailure(_) => "parse_failure",
            RequestError::Cancelled => "cancelled",
            RequestError::CircuitOpen { .. } => "circuit_open",
            RequestError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            RequestError::StorageUnavailable(_) => "storage_unavailable",
            RequestError::ValidationFailure(_) => "validation_failure",
        }
    }
}

/// Check if an HTTP status code should be retried
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..=599).contains(&status)
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        RequestError::ParseFailure(err.to_string())
    }
}
