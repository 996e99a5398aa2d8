//! Notification text and data for each kind of push.

use chrono::{DateTime, SecondsFormat, Utc};

use habitual_push::NotificationPayload;
use habitual_store::{Challenge, ChallengeDetails, ChallengeKind};

/// Fixed broadcast text and reminder title for one challenge kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindTemplates {
    pub broadcast_title: &'static str,
    pub broadcast_body: &'static str,
    pub reminder_title: &'static str,
}

/// Templates for `kind`. Adding a kind fails to compile until it has an arm here.
pub fn templates(kind: ChallengeKind) -> KindTemplates {
    match kind {
        ChallengeKind::Ninety => KindTemplates {
            broadcast_title: "90-Day Challenge",
            broadcast_body: "Time to work on your 90-day challenge habit!",
            reminder_title: "90-Day Challenge Reminder",
        },
        ChallengeKind::Thirty => KindTemplates {
            broadcast_title: "30-Day Challenge",
            broadcast_body: "Keep up with your 30-day challenge today!",
            reminder_title: "30-Day Challenge Reminder",
        },
        ChallengeKind::Replacement => KindTemplates {
            broadcast_title: "Habit Replacement",
            broadcast_body: "Remember to replace your old habit with your new one today!",
            reminder_title: "Habit Replacement Reminder",
        },
    }
}

pub const DAILY_LOG_TITLE: &str = "Daily Log Reminder";
pub const DAILY_LOG_BODY: &str = "Don't forget to log your progress for today!";

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Blank strings count as absent.
fn or_default<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

/// Morning broadcast for every user of `kind`.
pub fn broadcast(kind: ChallengeKind, at: DateTime<Utc>) -> NotificationPayload {
    let t = templates(kind);
    NotificationPayload::new(t.broadcast_title, t.broadcast_body)
        .with_data("type", kind.as_str())
        .with_data("timestamp", timestamp(at))
}

/// Evening prompt to record the day's progress.
pub fn daily_log(at: DateTime<Utc>) -> NotificationPayload {
    NotificationPayload::new(DAILY_LOG_TITLE, DAILY_LOG_BODY)
        .with_data("type", "daily_log")
        .with_data("timestamp", timestamp(at))
}

/// Reminder body built from the challenge's own fields.
pub fn reminder_body(details: &ChallengeDetails) -> String {
    match details {
        ChallengeDetails::Ninety { habit, .. } => {
            format!("Time for your {} habit!", or_default(habit, "daily"))
        }
        ChallengeDetails::Thirty { theme, .. } => {
            format!("Don't forget your {} today!", or_default(theme, "challenge"))
        }
        ChallengeDetails::Replacement {
            habit_to_quit,
            custom_habit,
            ..
        } => format!(
            "Remember to replace {} with {}!",
            or_default(habit_to_quit, "your old habit"),
            or_default(custom_habit, "your new habit")
        ),
    }
}

/// Personal reminder for one challenge.
pub fn reminder(challenge: &Challenge, at: DateTime<Utc>) -> NotificationPayload {
    let kind = challenge.kind();
    NotificationPayload::new(templates(kind).reminder_title, reminder_body(&challenge.details))
        .with_data("type", "reminder")
        .with_data("challenge_id", challenge.id.clone())
        .with_data("challenge_type", kind.as_str())
        .with_data("timestamp", timestamp(at))
}
