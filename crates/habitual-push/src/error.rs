//! Error types for the push gateway.

use thiserror::Error;

/// Errors that can occur when talking to the push provider.
#[derive(Debug, Error)]
pub enum PushError {
    /// Could not obtain or use an access token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The device token is no longer registered with the provider.
    #[error("device token is unregistered: {0}")]
    Unregistered(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Error reported by FCM.
    #[error("FCM error: {status} - {message}")]
    Fcm { status: String, message: String },

    /// Invalid response from the provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl PushError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PushError::Fcm { status, .. } => {
                status == "UNAVAILABLE" || status == "INTERNAL" || status == "UNKNOWN"
            }
            PushError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
