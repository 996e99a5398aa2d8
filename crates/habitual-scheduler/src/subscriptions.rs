//! Keeps device tokens subscribed to their timezone's broadcast topics.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use habitual_push::PushGateway;
use habitual_store::{ChallengeKind, User};

use crate::topic::topic_for;

/// What to do with the old topics when a user's token or timezone changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalePolicy {
    /// Unsubscribe the previous token/timezone combination.
    #[default]
    Prune,
    /// Leave the previous subscriptions in place.
    Keep,
}

impl FromStr for StalePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prune" => Ok(StalePolicy::Prune),
            "keep" => Ok(StalePolicy::Keep),
            other => Err(format!("unknown stale subscription policy '{}'", other)),
        }
    }
}

impl fmt::Display for StalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StalePolicy::Prune => "prune",
            StalePolicy::Keep => "keep",
        })
    }
}

/// Counts of topic membership changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    pub subscribed: usize,
    pub unsubscribed: usize,
    pub failed: usize,
}

impl SubscriptionReport {
    fn merge(&mut self, other: SubscriptionReport) {
        self.subscribed += other.subscribed;
        self.unsubscribed += other.unsubscribed;
        self.failed += other.failed;
    }
}

/// Topic membership hooks run when users are created or updated.
pub struct TopicSubscriptions {
    gateway: Arc<dyn PushGateway>,
    policy: StalePolicy,
}

impl TopicSubscriptions {
    pub fn new(gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            gateway,
            policy: StalePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StalePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> StalePolicy {
        self.policy
    }

    /// Subscribe `token` to every kind's topic for `timezone`.
    #[tracing::instrument(skip(self, token))]
    pub async fn subscribe_all(&self, token: &str, timezone: &str) -> SubscriptionReport {
        let results = join_all(ChallengeKind::ALL.into_iter().map(|kind| {
            let topic = topic_for(kind, timezone);
            async move {
                let result = self.gateway.subscribe(token, &topic).await;
                if let Err(e) = &result {
                    warn!(topic = %topic, error = %e, "topic subscribe failed");
                }
                result.is_ok()
            }
        }))
        .await;

        let subscribed = results.iter().filter(|ok| **ok).count();
        SubscriptionReport {
            subscribed,
            failed: results.len() - subscribed,
            ..Default::default()
        }
    }

    /// Remove `token` from every kind's topic for `timezone`.
    #[tracing::instrument(skip(self, token))]
    pub async fn unsubscribe_all(&self, token: &str, timezone: &str) -> SubscriptionReport {
        let results = join_all(ChallengeKind::ALL.into_iter().map(|kind| {
            let topic = topic_for(kind, timezone);
            async move {
                let result = self.gateway.unsubscribe(token, &topic).await;
                if let Err(e) = &result {
                    warn!(topic = %topic, error = %e, "topic unsubscribe failed");
                }
                result.is_ok()
            }
        }))
        .await;

        let unsubscribed = results.iter().filter(|ok| **ok).count();
        SubscriptionReport {
            unsubscribed,
            failed: results.len() - unsubscribed,
            ..Default::default()
        }
    }

    /// Subscribe a new user's device, if it has one.
    pub async fn on_user_created(&self, user: &User) -> SubscriptionReport {
        match user.device_token() {
            Some(token) => {
                let report = self.subscribe_all(token, &user.timezone).await;
                info!(user = %user.id, timezone = %user.timezone, subscribed = report.subscribed, "subscribed new user");
                report
            }
            None => {
                debug!(user = %user.id, "new user has no device token");
                SubscriptionReport::default()
            }
        }
    }

    /// Move a user's subscriptions after a token or timezone change.
    pub async fn on_user_updated(&self, before: &User, after: &User) -> SubscriptionReport {
        let old_token = before.device_token();
        let new_token = after.device_token();
        if old_token == new_token && before.timezone == after.timezone {
            return SubscriptionReport::default();
        }

        let mut report = SubscriptionReport::default();
        if self.policy == StalePolicy::Prune
            && let Some(old) = old_token
        {
            report.merge(self.unsubscribe_all(old, &before.timezone).await);
        }
        if let Some(new) = new_token {
            report.merge(self.subscribe_all(new, &after.timezone).await);
        }

        info!(
            user = %after.id,
            timezone = %after.timezone,
            subscribed = report.subscribed,
            unsubscribed = report.unsubscribed,
            failed = report.failed,
            "updated topic subscriptions"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!("prune".parse::<StalePolicy>(), Ok(StalePolicy::Prune));
        assert_eq!(" KEEP ".parse::<StalePolicy>(), Ok(StalePolicy::Keep));
        assert!("forget".parse::<StalePolicy>().is_err());
        assert_eq!(StalePolicy::default(), StalePolicy::Prune);
    }

    #[test]
    fn test_report_merge() {
        let mut report = SubscriptionReport {
            subscribed: 3,
            ..Default::default()
        };
        report.merge(SubscriptionReport {
            unsubscribed: 2,
            failed: 1,
            ..Default::default()
        });
        assert_eq!(
            report,
            SubscriptionReport {
                subscribed: 3,
                unsubscribed: 2,
                failed: 1
            }
        );
    }
}
