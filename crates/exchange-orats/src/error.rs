//! Error types for the ORATS data API.
//!
//! Errors are classified so the client can tell transient failures
//! (network, timeout, 5xx, rate limit) from ones that retrying cannot fix.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to ORATS.
#[derive(Debug, Error)]
pub enum OratsError {
    /// Token rejected (HTTP 401/403).
    #[error("authentication rejected ({status_code}): {message}")]
    Authentication {
        /// HTTP status code.
        status_code: u16,
        /// Response body.
        message: String,
    },

    /// Non-success response other than auth and rate limiting.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Response body.
        message: String,
    },

    /// Rate limit exceeded (HTTP 429).
    #[error("rate limit exceeded")]
    RateLimit {
        /// `Retry-After` header value, if the server sent one.
        retry_after_secs: Option<u64>,
    },

    /// Connection or transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The availability lookup returned no usable date.
    #[error("no trade date with data available for {ticker}")]
    NoTradeDate {
        /// Ticker that was looked up.
        ticker: String,
    },

    /// Every attempt failed with a transient error.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: Box<OratsError>,
    },

    /// Client could not be constructed.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OratsError {
    /// Creates an error from a non-success status code and body.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => Self::Authentication {
                status_code,
                message,
            },
            429 => Self::RateLimit {
                retry_after_secs: None,
            },
            _ => Self::Api {
                status_code,
                message,
            },
        }
    }

    /// Returns true if the request may succeed when repeated.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Returns true if the provider rejected the token.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Server-requested wait before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for OratsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for OratsError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

/// Result type alias for ORATS operations.
pub type Result<T> = std::result::Result<T, OratsError>;
