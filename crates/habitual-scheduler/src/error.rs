//! Error types for reminder dispatch.

use thiserror::Error;

/// Errors that can occur while resolving or dispatching reminders.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Data store error.
    #[error("store error: {0}")]
    Store(#[from] habitual_store::StoreError),

    /// Push gateway error.
    #[error("push error: {0}")]
    Push(#[from] habitual_push::PushError),

    /// Timezone name not present in the compiled IANA database.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    /// A catalog must name at least one zone.
    #[error("timezone catalog is empty")]
    EmptyCatalog,

    /// Could not parse a `HH:MM` local time.
    #[error("invalid local time: {0}")]
    InvalidLocalTime(String),
}
