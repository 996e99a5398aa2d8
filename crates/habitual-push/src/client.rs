//! Firebase Cloud Messaging HTTP v1 client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::AccessTokens;
use crate::types::{
    ErrorEnvelope, SendRequest, SendResponse, TopicMembershipRequest, TopicMembershipResponse,
};
use crate::{MessageId, NotificationPayload, PushError, PushGateway, Target, TokenSource};

/// Default FCM API origin.
pub const DEFAULT_FCM_URL: &str = "https://fcm.googleapis.com";

/// Default Instance ID API origin (topic membership).
pub const DEFAULT_IID_URL: &str = "https://iid.googleapis.com";

/// Retries after the initial attempt for transient failures.
const MAX_RETRIES: u32 = 3;

/// Client for sending messages through FCM.
pub struct FcmClient {
    http: Client,
    fcm_url: String,
    iid_url: String,
    project_id: String,
    tokens: AccessTokens,
}

impl FcmClient {
    /// Create a client for `project_id` against the public Google endpoints.
    pub fn new(project_id: impl Into<String>, source: TokenSource) -> Result<Self, PushError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            fcm_url: DEFAULT_FCM_URL.to_string(),
            iid_url: DEFAULT_IID_URL.to_string(),
            project_id: project_id.into(),
            tokens: AccessTokens::new(source),
        })
    }

    /// Override the FCM API origin.
    pub fn with_fcm_url(mut self, url: impl Into<String>) -> Self {
        self.fcm_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the Instance ID API origin.
    pub fn with_iid_url(mut self, url: impl Into<String>) -> Self {
        self.iid_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Send one message to a device or topic.
    #[tracing::instrument(skip(self, payload), fields(title = %payload.title))]
    pub async fn send(
        &self,
        target: &Target,
        payload: &NotificationPayload,
    ) -> Result<MessageId, PushError> {
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.fcm_url, self.project_id
        );
        let body = SendRequest::new(target, payload);

        let response: SendResponse = self
            .post_with_retry(&url, &body, false, "send", |e| match (e, target) {
                (PushError::Fcm { .. }, Target::Token(token)) if is_unregistered(e) => {
                    Some(PushError::Unregistered(token.clone()))
                }
                _ => None,
            })
            .await?;

        debug!(message = %response.name, "message accepted");
        Ok(MessageId(response.name))
    }

    /// Add or remove one device from a topic via the Instance ID API.
    async fn change_membership(
        &self,
        token: &str,
        topic: &str,
        add: bool,
    ) -> Result<(), PushError> {
        let action = if add { "batchAdd" } else { "batchRemove" };
        let url = format!("{}/iid/v1:{}", self.iid_url, action);
        let body = TopicMembershipRequest {
            to: format!("/topics/{}", topic),
            registration_tokens: vec![token],
        };

        let response: TopicMembershipResponse = self
            .post_with_retry(&url, &body, true, action, |_| None)
            .await?;

        match response.results.into_iter().find_map(|r| r.error) {
            Some(error) if error == "NOT_FOUND" || error == "INVALID_ARGUMENT" => {
                Err(PushError::Unregistered(token.to_string()))
            }
            Some(error) => Err(PushError::Fcm {
                status: error,
                message: format!("{} failed for topic {}", action, topic),
            }),
            None => Ok(()),
        }
    }

    /// POST a JSON body, refreshing the token once on 401 and retrying
    /// transient failures with exponential backoff.
    async fn post_with_retry<B, T, F>(
        &self,
        url: &str,
        body: &B,
        iid: bool,
        operation: &str,
        classify: F,
    ) -> Result<T, PushError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
        F: Fn(&PushError) -> Option<PushError>,
    {
        let mut refreshed = false;
        let mut attempt = 0;

        loop {
            let token = self.tokens.token(&self.http).await?;

            let mut request = self.http.post(url).bearer_auth(&token).json(body);
            if iid {
                request = request.header("access_token_auth", "true");
            }

            let result = match request.send().await {
                Ok(response) => self.handle_response(response).await,
                Err(e) => Err(PushError::Http(e)),
            };

            match result {
                Ok(v) => return Ok(v),
                Err(PushError::Auth(_)) if !refreshed && self.tokens.can_refresh() => {
                    refreshed = true;
                    self.tokens.invalidate().await;
                    debug!(operation, "access token rejected, refreshing");
                    continue;
                }
                Err(ref e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let backoff_ms = 500 * (1 << attempt); // 500ms, 1s, 2s
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        operation,
                        "transient push error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(classify(&e).unwrap_or(e)),
            }
        }
    }

    /// Handle an HTTP response, converting errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, PushError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(PushError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                PushError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            if status == StatusCode::UNAUTHORIZED {
                return Err(PushError::Auth(format!("request rejected ({}): {}", status, text)));
            }

            // Try to parse as a Google API error
            if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&text) {
                let status_name = envelope
                    .error
                    .fcm_error_code()
                    .map(str::to_string)
                    .unwrap_or(envelope.error.status);
                return Err(PushError::Fcm {
                    status: status_name,
                    message: envelope.error.message,
                });
            }

            if status.is_server_error() {
                return Err(PushError::Fcm {
                    status: "UNAVAILABLE".to_string(),
                    message: format!("request failed ({}): {}", status, text),
                });
            }

            return Err(PushError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

fn is_unregistered(err: &PushError) -> bool {
    matches!(
        err,
        PushError::Fcm { status, .. } if status == "UNREGISTERED"
    )
}

#[async_trait]
impl PushGateway for FcmClient {
    async fn send_to_device(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, PushError> {
        self.send(&Target::Token(token.to_string()), payload).await
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, PushError> {
        self.send(&Target::Topic(topic.to_string()), payload).await
    }

    async fn subscribe(&self, token: &str, topic: &str) -> Result<(), PushError> {
        self.change_membership(token, topic, true).await
    }

    async fn unsubscribe(&self, token: &str, topic: &str) -> Result<(), PushError> {
        self.change_membership(token, topic, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> FcmClient {
        FcmClient::new("demo-project", TokenSource::Static("test-token".to_string()))
            .unwrap()
            .with_fcm_url(server.uri())
            .with_iid_url(server.uri())
    }

    #[test]
    fn test_client_creation() {
        let client =
            FcmClient::new("demo-project", TokenSource::Static("t".to_string())).unwrap();
        assert_eq!(client.project_id(), "demo-project");
        assert_eq!(client.fcm_url, DEFAULT_FCM_URL);
    }

    #[test]
    fn test_url_override_trims_slash() {
        let client = FcmClient::new("p", TokenSource::Static("t".to_string()))
            .unwrap()
            .with_fcm_url("http://localhost:9000/");
        assert_eq!(client.fcm_url, "http://localhost:9000");
    }

    #[tokio::test]
    async fn test_send_to_device_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(serde_json::json!({
                "message": {
                    "token": "device-1",
                    "notification": { "title": "Daily Log Reminder" }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/demo-project/messages/123"
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let payload = NotificationPayload::new("Daily Log Reminder", "body");
        let id = client.send_to_device("device-1", &payload).await.unwrap();

        assert_eq!(id.0, "projects/demo-project/messages/123");
    }

    #[tokio::test]
    async fn test_send_to_topic_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .and(body_partial_json(serde_json::json!({
                "message": { "topic": "ninety_Europe_London" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/demo-project/messages/456"
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let payload = NotificationPayload::new("90-Day Challenge", "body");
        let result = client.send_to_topic("ninety_Europe_London", &payload).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {
                    "code": 404,
                    "message": "Requested entity was not found.",
                    "status": "NOT_FOUND",
                    "details": [{
                        "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                        "errorCode": "UNREGISTERED"
                    }]
                }
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let payload = NotificationPayload::new("t", "b");
        let err = client.send_to_device("stale", &payload).await.unwrap_err();

        assert!(matches!(err, PushError::Unregistered(ref t) if t == "stale"));
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let payload = NotificationPayload::new("t", "b");
        let err = client.send_to_topic("thirty_UTC", &payload).await.unwrap_err();

        assert!(matches!(
            err,
            PushError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": { "code": 503, "message": "try later", "status": "UNAVAILABLE" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/demo-project/messages/789"
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let payload = NotificationPayload::new("t", "b");
        let id = client.send_to_device("device-1", &payload).await.unwrap();

        assert_eq!(id.0, "projects/demo-project/messages/789");
    }

    #[tokio::test]
    async fn test_static_token_rejected_is_auth_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let payload = NotificationPayload::new("t", "b");
        let err = client.send_to_device("device-1", &payload).await.unwrap_err();

        assert!(matches!(err, PushError::Auth(_)));
    }

    #[tokio::test]
    async fn test_subscribe_uses_instance_id_api() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/iid/v1:batchAdd"))
            .and(header("access_token_auth", "true"))
            .and(body_partial_json(serde_json::json!({
                "to": "/topics/ninety_Europe_London",
                "registration_tokens": ["device-1"]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": [{}] })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        client
            .subscribe("device-1", "ninety_Europe_London")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_reports_per_token_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/iid/v1:batchRemove"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{ "error": "NOT_FOUND" }]
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let err = client
            .unsubscribe("gone", "thirty_UTC")
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::Unregistered(_)));
    }
}
