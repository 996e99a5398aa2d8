//! One-shot commands: zone lookup, manual sends and subscription sync.

use std::sync::Arc;

use miette::Result;
use tracing::info;

use habitual_push::{NotificationPayload, PushGateway, Target};
use habitual_scheduler::{LocalTime, StalePolicy, TopicSubscriptions, zones_at_local_time};
use habitual_store::{ReminderStore, SqliteStore};

use crate::daemon::build_catalog;

/// Print every zone whose wall clock currently reads `at`.
pub fn zones(at: LocalTime, timezones: Option<&str>) -> Result<()> {
    let catalog = build_catalog(timezones)?;
    let due = zones_at_local_time(&catalog, chrono::Utc::now(), at);

    if due.is_empty() {
        println!("No timezones are at {} right now.", at);
        return Ok(());
    }
    for zone in due {
        println!("{}", zone);
    }
    Ok(())
}

/// Send one notification.
pub async fn send(
    gateway: Arc<dyn PushGateway>,
    target: Target,
    title: &str,
    body: &str,
    data: Vec<(String, String)>,
) -> Result<()> {
    let mut payload = NotificationPayload::new(title, body);
    payload.data.extend(data);

    let result = match &target {
        Target::Token(token) => gateway.send_to_device(token, &payload).await,
        Target::Topic(topic) => gateway.send_to_topic(topic, &payload).await,
    };
    let id = result.map_err(|e| miette::miette!("send failed: {}", e))?;

    info!(target = ?target, message = %id, "sent notification");
    println!("Sent: {}", id);
    Ok(())
}

/// Subscribe a stored user's device to their topics, moving it off the
/// previous token/timezone when one is given.
pub async fn subscribe(
    database: &str,
    gateway: Arc<dyn PushGateway>,
    user_id: &str,
    previous_timezone: Option<String>,
    previous_token: Option<String>,
    stale: StalePolicy,
) -> Result<()> {
    let store = SqliteStore::open(database)
        .map_err(|e| miette::miette!("failed to open database: {}", e))?;
    let user = store
        .get_user(user_id)
        .await
        .map_err(|e| miette::miette!("failed to load user: {}", e))?
        .ok_or_else(|| miette::miette!("user not found: {}", user_id))?;

    let subscriptions = TopicSubscriptions::new(gateway).with_policy(stale);

    let report = if previous_timezone.is_some() || previous_token.is_some() {
        let mut before = user.clone();
        if let Some(timezone) = previous_timezone {
            before.timezone = timezone;
        }
        if let Some(token) = previous_token {
            before.fcm_token = Some(token);
        }
        subscriptions.on_user_updated(&before, &user).await
    } else {
        if user.device_token().is_none() {
            return Err(miette::miette!("user {} has no device token", user_id));
        }
        subscriptions.on_user_created(&user).await
    };

    println!(
        "Subscribed: {}, unsubscribed: {}, failed: {}",
        report.subscribed, report.unsubscribed, report.failed
    );
    if report.failed > 0 {
        return Err(miette::miette!(
            "{} topic membership change(s) failed",
            report.failed
        ));
    }
    Ok(())
}
