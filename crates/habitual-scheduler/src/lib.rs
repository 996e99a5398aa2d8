//! Timezone-aware reminder scheduling and dispatch for Habitual.
//!
//! This crate provides:
//! - A timezone catalog and a bucketer that finds the zones at a given local time
//! - Deterministic per-kind, per-zone broadcast topic names
//! - Reminder label resolution against each user's local hour
//! - Three dispatch jobs (kind broadcast, daily log, challenge reminders)
//!   driven by a minute-aligned ticker
//! - Topic subscription hooks for user creation and updates

pub mod catalog;
pub mod clock;
mod engine;
mod error;
mod jobs;
pub mod payload;
pub mod reminder;
mod subscriptions;
pub mod topic;

pub use catalog::{TimezoneCatalog, TimezoneId};
pub use clock::{LocalTime, local_time_in, zones_at_local_time};
pub use engine::{
    DEFAULT_BROADCAST_TIME, DEFAULT_DAILY_LOG_TIME, DEFAULT_MAX_CONCURRENT_SENDS,
    DEFAULT_MAX_REPLAY_MINUTES, DispatchConfig, DispatchEngine, Ticker, due_ticks, floor_minute,
    next_minute_boundary,
};
pub use error::SchedulerError;
pub use jobs::{ChallengeReminderJob, DailyLogJob, Job, JobReport, KindBroadcastJob, Tick};
pub use reminder::{TimeOfDay, canonical_hour, due_label, is_due_now};
pub use subscriptions::{StalePolicy, SubscriptionReport, TopicSubscriptions};
pub use topic::topic_for;
