//! The push delivery surface used by the dispatch engine.

use async_trait::async_trait;
use tracing::info;

use crate::{MessageId, NotificationPayload, PushError};

/// Delivers notifications and manages topic membership.
///
/// Every call is independent; a failure affects only that call's target.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Deliver a payload to one device.
    async fn send_to_device(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, PushError>;

    /// Broadcast a payload to every device subscribed to `topic`.
    async fn send_to_topic(
        &self,
        topic: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, PushError>;

    /// Add a device to a topic.
    async fn subscribe(&self, token: &str, topic: &str) -> Result<(), PushError>;

    /// Remove a device from a topic.
    async fn unsubscribe(&self, token: &str, topic: &str) -> Result<(), PushError>;
}

/// Gateway that logs every call and delivers nothing.
#[derive(Debug, Default, Clone)]
pub struct DryRunGateway;

#[async_trait]
impl PushGateway for DryRunGateway {
    async fn send_to_device(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, PushError> {
        info!(token = %token, title = %payload.title, body = %payload.body, "dry run: send to device");
        Ok(MessageId(format!("dry-run/device/{}", token)))
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, PushError> {
        info!(topic = %topic, title = %payload.title, body = %payload.body, "dry run: send to topic");
        Ok(MessageId(format!("dry-run/topic/{}", topic)))
    }

    async fn subscribe(&self, token: &str, topic: &str) -> Result<(), PushError> {
        info!(token = %token, topic = %topic, "dry run: subscribe");
        Ok(())
    }

    async fn unsubscribe(&self, token: &str, topic: &str) -> Result<(), PushError> {
        info!(token = %token, topic = %topic, "dry run: unsubscribe");
        Ok(())
    }
}
