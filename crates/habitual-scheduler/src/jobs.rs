//! The three dispatch jobs run on every tick.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use habitual_push::{NotificationPayload, PushGateway, Target};
use habitual_store::{ChallengeKind, ReminderStore};

use crate::clock::{LocalTime, zones_at_local_time};
use crate::reminder::due_label;
use crate::topic::topic_for;
use crate::{SchedulerError, TimezoneCatalog, payload};

/// One minute of wall-clock time, seconds zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick {
    pub at: DateTime<Utc>,
}

/// Outcome counts of one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Messages attempted.
    pub targets: usize,
    /// Messages the gateway accepted.
    pub delivered: usize,
    /// Messages the gateway rejected.
    pub failed: usize,
    /// Recipients left out because they have no device token or no reminder times.
    pub skipped: usize,
}

/// A unit of work evaluated once per tick.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluate `tick` and send whatever is due at that instant.
    async fn run(&self, tick: Tick) -> Result<JobReport, SchedulerError>;
}

/// Send every message with bounded concurrency. Failures are logged and
/// counted; they never stop the rest of the batch.
async fn deliver(
    gateway: &dyn PushGateway,
    messages: Vec<(Target, NotificationPayload)>,
    max_concurrent: usize,
    report: &mut JobReport,
) {
    report.targets += messages.len();

    let outcomes: Vec<bool> = stream::iter(messages)
        .map(|(target, payload)| async move {
            let result = match &target {
                Target::Token(token) => gateway.send_to_device(token, &payload).await,
                Target::Topic(topic) => gateway.send_to_topic(topic, &payload).await,
            };
            match result {
                Ok(id) => {
                    debug!(target = ?target, message = %id, "push delivered");
                    true
                }
                Err(e) => {
                    warn!(target = ?target, error = %e, "push delivery failed");
                    false
                }
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    let delivered = outcomes.iter().filter(|ok| **ok).count();
    report.delivered += delivered;
    report.failed += outcomes.len() - delivered;
}

/// Broadcasts each kind's morning message to every zone where it is now
/// the configured local time.
pub struct KindBroadcastJob {
    catalog: Arc<TimezoneCatalog>,
    gateway: Arc<dyn PushGateway>,
    at: LocalTime,
    max_concurrent_sends: usize,
}

impl KindBroadcastJob {
    pub fn new(
        catalog: Arc<TimezoneCatalog>,
        gateway: Arc<dyn PushGateway>,
        at: LocalTime,
        max_concurrent_sends: usize,
    ) -> Self {
        Self {
            catalog,
            gateway,
            at,
            max_concurrent_sends,
        }
    }
}

#[async_trait]
impl Job for KindBroadcastJob {
    fn name(&self) -> &'static str {
        "kind-broadcast"
    }

    #[tracing::instrument(skip(self), fields(job = self.name(), at = %tick.at))]
    async fn run(&self, tick: Tick) -> Result<JobReport, SchedulerError> {
        let mut report = JobReport::default();
        let zones = zones_at_local_time(&self.catalog, tick.at, self.at);
        if zones.is_empty() {
            return Ok(report);
        }
        debug!(zones = zones.len(), "zones due for kind broadcast");

        let messages = zones
            .iter()
            .flat_map(|zone| {
                ChallengeKind::ALL.into_iter().map(move |kind| {
                    (
                        Target::Topic(topic_for(kind, zone)),
                        payload::broadcast(kind, tick.at),
                    )
                })
            })
            .collect();

        deliver(
            self.gateway.as_ref(),
            messages,
            self.max_concurrent_sends,
            &mut report,
        )
        .await;
        Ok(report)
    }
}

/// Reminds every user with a device to log their progress at the configured
/// local time.
pub struct DailyLogJob {
    catalog: Arc<TimezoneCatalog>,
    store: Arc<dyn ReminderStore>,
    gateway: Arc<dyn PushGateway>,
    at: LocalTime,
    max_concurrent_sends: usize,
}

impl DailyLogJob {
    pub fn new(
        catalog: Arc<TimezoneCatalog>,
        store: Arc<dyn ReminderStore>,
        gateway: Arc<dyn PushGateway>,
        at: LocalTime,
        max_concurrent_sends: usize,
    ) -> Self {
        Self {
            catalog,
            store,
            gateway,
            at,
            max_concurrent_sends,
        }
    }
}

#[async_trait]
impl Job for DailyLogJob {
    fn name(&self) -> &'static str {
        "daily-log"
    }

    #[tracing::instrument(skip(self), fields(job = self.name(), at = %tick.at))]
    async fn run(&self, tick: Tick) -> Result<JobReport, SchedulerError> {
        let mut report = JobReport::default();
        let zones = zones_at_local_time(&self.catalog, tick.at, self.at);
        if zones.is_empty() {
            return Ok(report);
        }

        let mut messages = Vec::new();
        for zone in &zones {
            let users = self.store.users_in_timezone(zone).await?;
            debug!(zone = %zone, users = users.len(), "users due for daily log");

            for user in users {
                match user.device_token() {
                    Some(token) => messages.push((
                        Target::Token(token.to_string()),
                        payload::daily_log(tick.at),
                    )),
                    None => report.skipped += 1,
                }
            }
        }

        deliver(
            self.gateway.as_ref(),
            messages,
            self.max_concurrent_sends,
            &mut report,
        )
        .await;
        Ok(report)
    }
}

/// Sends personal challenge reminders once per hour, to every active
/// challenge whose reminder label falls in its owner's current local hour.
pub struct ChallengeReminderJob {
    store: Arc<dyn ReminderStore>,
    gateway: Arc<dyn PushGateway>,
    minute: u32,
    max_concurrent_sends: usize,
}

impl ChallengeReminderJob {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        gateway: Arc<dyn PushGateway>,
        minute: u32,
        max_concurrent_sends: usize,
    ) -> Self {
        Self {
            store,
            gateway,
            minute,
            max_concurrent_sends,
        }
    }
}

#[async_trait]
impl Job for ChallengeReminderJob {
    fn name(&self) -> &'static str {
        "challenge-reminder"
    }

    #[tracing::instrument(skip(self), fields(job = self.name(), at = %tick.at))]
    async fn run(&self, tick: Tick) -> Result<JobReport, SchedulerError> {
        let mut report = JobReport::default();
        if tick.at.minute() != self.minute {
            return Ok(report);
        }

        let rows = self.store.active_reminders().await?;
        debug!(rows = rows.len(), "evaluating active reminders");

        let mut messages = Vec::new();
        for row in &rows {
            let Some(token) = row.user.device_token() else {
                report.skipped += 1;
                continue;
            };
            if row.challenge.reminder_times.is_empty() {
                report.skipped += 1;
                continue;
            }

            if let Some(label) = due_label(&row.challenge, &row.user, tick.at) {
                debug!(challenge = %row.challenge.id, label, "reminder due");
                messages.push((
                    Target::Token(token.to_string()),
                    payload::reminder(&row.challenge, tick.at),
                ));
            }
        }

        deliver(
            self.gateway.as_ref(),
            messages,
            self.max_concurrent_sends,
            &mut report,
        )
        .await;
        Ok(report)
    }
}
