//! Data store collaborator for Habitual.
//!
//! This crate provides:
//! - Read-only entity views (`User`, `Challenge`) with typed optional fields
//! - The `ReminderStore` query trait consumed by the dispatch jobs
//! - A SQLite adapter mirroring the backend's `users`/`challenges` tables

mod error;
mod sqlite;
mod store;
mod types;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use store::ReminderStore;
pub use types::{
    Challenge, ChallengeDetails, ChallengeKind, DEFAULT_TIMEZONE, ReminderRow, User,
};
