//! The query surface the reminder engine depends on.

use async_trait::async_trait;

use crate::{ReminderRow, StoreError, User};

/// Read-only queries used by the dispatch jobs.
///
/// Every call is a fresh query; implementations hold no cursor between calls.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// All users whose stored timezone equals `timezone` exactly.
    async fn users_in_timezone(&self, timezone: &str) -> Result<Vec<User>, StoreError>;

    /// All non-completed challenges with reminders enabled, joined to their owner.
    async fn active_reminders(&self) -> Result<Vec<ReminderRow>, StoreError>;

    /// Look up one user.
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;
}
