//! Error types for the data store.

use thiserror::Error;

/// Errors that can occur when querying the data store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored row could not be interpreted.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// The store is temporarily unusable (poisoned lock, cancelled worker).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
