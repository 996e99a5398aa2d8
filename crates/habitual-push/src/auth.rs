//! OAuth access tokens for the FCM HTTP v1 API.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::PushError;

/// Default GCE / Cloud Run metadata endpoint for the attached service account.
pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Token endpoint used when a service account key omits `token_uri`.
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth scope required to send messages.
pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for signed assertions. Google caps this at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh cached tokens this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Where access tokens come from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// A pre-issued bearer token (e.g. from `gcloud auth print-access-token`).
    ///
    /// Cannot be refreshed. Google issues these for about an hour, so every
    /// send fails with [`PushError::Auth`] once it lapses.
    Static(String),
    /// The instance metadata server.
    Metadata { url: String },
    /// A service account key, exchanged for tokens with a signed JWT.
    ServiceAccount(ServiceAccountKey),
}

impl TokenSource {
    /// Metadata server at its default address.
    pub fn metadata() -> Self {
        TokenSource::Metadata {
            url: DEFAULT_METADATA_TOKEN_URL.to_string(),
        }
    }

    /// Load a service account key file as downloaded from the Firebase console.
    pub fn service_account_file(path: impl AsRef<Path>) -> Result<Self, PushError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            PushError::Auth(format!(
                "failed to read service account key {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::service_account_json(&json)
    }

    /// Parse a service account key from its JSON text.
    pub fn service_account_json(json: &str) -> Result<Self, PushError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| PushError::Auth(format!("invalid service account key: {}", e)))?;
        // Fail at startup rather than on the first send.
        EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| PushError::Auth(format!("invalid service account private key: {}", e)))?;
        Ok(TokenSource::ServiceAccount(key))
    }
}

/// The fields of a service account key file that token minting needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_OAUTH_TOKEN_URL.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    /// RS256-signed assertion for the JWT bearer grant.
    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, PushError> {
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: FCM_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| PushError::Auth(format!("invalid service account private key: {}", e)))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| PushError::Auth(format!("failed to sign token assertion: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn fresh(&self) -> Option<String> {
        (self.expires_at > Utc::now()).then(|| self.token.clone())
    }
}

/// Token cache shared by all requests of one client.
pub(crate) struct AccessTokens {
    source: TokenSource,
    cached: RwLock<Option<CachedToken>>,
}

impl AccessTokens {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
        }
    }

    /// Whether `invalidate` followed by `token` can yield a different token.
    pub fn can_refresh(&self) -> bool {
        !matches!(self.source, TokenSource::Static(_))
    }

    /// Current bearer token, fetching a fresh one if needed.
    ///
    /// Concurrent callers that find the cache stale wait on the write lock,
    /// so a single fetch serves all of them.
    pub async fn token(&self, http: &Client) -> Result<String, PushError> {
        if let TokenSource::Static(token) = &self.source {
            return Ok(token.clone());
        }

        let fresh = self.cached.read().await.as_ref().and_then(CachedToken::fresh);
        if let Some(token) = fresh {
            return Ok(token);
        }

        let mut cached = self.cached.write().await;
        if let Some(token) = cached.as_ref().and_then(CachedToken::fresh) {
            return Ok(token);
        }

        let fetched = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Metadata { url } => fetch_from_metadata(http, url).await?,
            TokenSource::ServiceAccount(key) => fetch_with_assertion(http, key).await?,
        };

        let lifetime = (fetched.expires_in - EXPIRY_MARGIN_SECS).max(0);
        let expires_at = Utc::now() + Duration::seconds(lifetime);
        debug!(expires_at = %expires_at, "fetched access token");

        *cached = Some(CachedToken {
            token: fetched.access_token.clone(),
            expires_at,
        });
        Ok(fetched.access_token)
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

async fn fetch_from_metadata(http: &Client, url: &str) -> Result<TokenResponse, PushError> {
    let response = http
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(PushError::Auth(format!(
            "metadata token request failed ({}): {}",
            status, text
        )));
    }

    Ok(response.json().await?)
}

async fn fetch_with_assertion(
    http: &Client,
    key: &ServiceAccountKey,
) -> Result<TokenResponse, PushError> {
    let assertion = key.sign_assertion(Utc::now())?;
    let response = http
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(PushError::Auth(format!(
            "service account token request failed ({}): {}",
            status, text
        )));
    }

    debug!(client_email = %key.client_email, "exchanged service account assertion");
    Ok(response.json().await?)
}
