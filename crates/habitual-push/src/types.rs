//! Push message types and FCM wire formats.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Content of one push notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub body: String,
    /// String key/value data delivered alongside the notification.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    /// Add a data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Provider-assigned identifier of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a message is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A single device registration token.
    Token(String),
    /// A named topic.
    Topic(String),
}

/// Body of `POST /v1/projects/{project}/messages:send`.
#[derive(Debug, Serialize)]
pub(crate) struct SendRequest<'a> {
    pub message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FcmMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<&'a str>,
    pub notification: FcmNotification<'a>,
    #[serde(skip_serializing_if = "is_empty_map")]
    pub data: &'a BTreeMap<String, String>,
}

fn is_empty_map(map: &&BTreeMap<String, String>) -> bool {
    map.is_empty()
}

#[derive(Debug, Serialize)]
pub(crate) struct FcmNotification<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

impl<'a> SendRequest<'a> {
    pub fn new(target: &'a Target, payload: &'a NotificationPayload) -> Self {
        let (token, topic) = match target {
            Target::Token(token) => (Some(token.as_str()), None),
            Target::Topic(topic) => (None, Some(topic.as_str())),
        };
        Self {
            message: FcmMessage {
                token,
                topic,
                notification: FcmNotification {
                    title: &payload.title,
                    body: &payload.body,
                },
                data: &payload.data,
            },
        }
    }
}

/// Successful send response.
#[derive(Debug, Deserialize)]
pub(crate) struct SendResponse {
    pub name: String,
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
}

impl ErrorBody {
    /// The FCM-specific error code, if the provider attached one.
    pub fn fcm_error_code(&self) -> Option<&str> {
        self.details
            .iter()
            .find_map(|d| d.error_code.as_deref())
    }
}

/// Body of the Instance ID `batchAdd` / `batchRemove` calls.
#[derive(Debug, Serialize)]
pub(crate) struct TopicMembershipRequest<'a> {
    pub to: String,
    pub registration_tokens: Vec<&'a str>,
}

/// Response of the Instance ID batch calls: one result per token.
#[derive(Debug, Deserialize)]
pub(crate) struct TopicMembershipResponse {
    #[serde(default)]
    pub results: Vec<TopicMembershipResult>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TopicMembershipResult {
    pub error: Option<String>,
}
