use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{FcmCredentials, PushConfig};
use crate::token_fingerprint;
use crate::transport::{DeliveryError, DeliveryOutcome, PushMessage, PushTransport, TransportError};

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Service-account assertions are valid for at most one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh the cached access token this long before it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Firebase Cloud Messaging HTTP v1 transport.
///
/// Each message is a separate `messages:send` call; all calls for one batch
/// run concurrently and the batch resolves when every call has finished.
pub struct FcmTransport {
    http: reqwest::Client,
    config: PushConfig,
    cached_token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorStatus,
}

#[derive(Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    /// Present on `google.rpc.BadRequest` details.
    #[serde(rename = "fieldViolations", default)]
    field_violations: Vec<FieldViolation>,
}

#[derive(Deserialize)]
struct FieldViolation {
    #[serde(default)]
    field: String,
}

const TOKEN_FIELD: &str = "message.token";

impl FcmTransport {
    pub fn new(config: PushConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            cached_token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, TransportError> {
        let (client_email, private_key) = match &self.config.credentials {
            FcmCredentials::AccessToken(token) => return Ok(token.clone()),
            FcmCredentials::ServiceAccount {
                client_email,
                private_key,
            } => (client_email, private_key),
        };

        let mut cached = self.cached_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch_access_token(client_email, private_key).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// OAuth2 JWT-bearer grant with an RS256 assertion signed by the service account key.
    async fn fetch_access_token(
        &self,
        client_email: &str,
        private_key: &str,
    ) -> Result<CachedToken, TransportError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: client_email,
            scope: FCM_SCOPE,
            aud: &self.config.token_url,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Auth(format!("{}: {}", status, body)));
        }

        let token: AccessTokenResponse = response.json().await?;
        debug!("Obtained FCM access token valid for {}s", token.expires_in);

        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    async fn send_one(&self, access_token: &str, message: &PushMessage) -> DeliveryOutcome {
        let body = json!({
            "message": {
                "token": message.token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            }
        });

        let response = match self
            .http
            .post(self.config.send_url())
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    token = %token_fingerprint(&message.token),
                    "FCM request failed: {}", e
                );
                return Err(DeliveryError::transient("unavailable"));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED {
            // Force a fresh access token on the next batch.
            self.cached_token.lock().await.take();
        }

        let text = response.text().await.unwrap_or_default();
        let error = classify_error(status, &text);
        debug!(
            token = %token_fingerprint(&message.token),
            reason = %error.reason,
            "FCM rejected message ({})", status
        );
        Err(error)
    }
}

#[async_trait]
impl PushTransport for FcmTransport {
    async fn send_each(&self, messages: &[PushMessage]) -> Result<Vec<DeliveryOutcome>, TransportError> {
        let access_token = self.access_token().await?;

        let sends = messages
            .iter()
            .map(|message| self.send_one(&access_token, message));

        Ok(join_all(sends).await)
    }
}

/// Map an FCM v1 error response onto a delivery error.
///
/// The `FcmError.errorCode` detail wins over the canonical status, which in
/// turn wins over the bare HTTP status. `INVALID_ARGUMENT` only condemns the
/// token when no field violation is reported or one names `message.token`;
/// a rejected payload says nothing about the device.
pub fn classify_error(status: StatusCode, body: &str) -> DeliveryError {
    let (code, violated_fields) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let ErrorStatus { status: canonical, details } = envelope.error;
            let mut detail_code = None;
            let mut fields = Vec::new();
            for detail in details {
                if detail_code.is_none() {
                    detail_code = detail.error_code;
                }
                fields.extend(detail.field_violations.into_iter().map(|v| v.field));
            }
            let code = detail_code
                .or(canonical)
                .unwrap_or_else(|| fallback_code(status).to_string());
            (code, fields)
        }
        Err(_) => (fallback_code(status).to_string(), Vec::new()),
    };

    match code.as_str() {
        "UNREGISTERED" | "NOT_FOUND" => DeliveryError::permanent("unregistered"),
        "INVALID_ARGUMENT" => {
            if violated_fields.is_empty() || violated_fields.iter().any(|f| f == TOKEN_FIELD) {
                DeliveryError::permanent("invalid-argument")
            } else {
                DeliveryError::transient("invalid-payload")
            }
        }
        "SENDER_ID_MISMATCH" => DeliveryError::permanent("sender-id-mismatch"),
        "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED" => DeliveryError::transient("quota-exceeded"),
        "UNAVAILABLE" => DeliveryError::transient("unavailable"),
        "INTERNAL" => DeliveryError::transient("internal"),
        "THIRD_PARTY_AUTH_ERROR" => DeliveryError::transient("third-party-auth-error"),
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => DeliveryError::transient("unauthenticated"),
        _ => DeliveryError::transient("unknown"),
    }
}

fn fallback_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "INVALID_ARGUMENT",
        StatusCode::UNAUTHORIZED => "UNAUTHENTICATED",
        StatusCode::FORBIDDEN => "PERMISSION_DENIED",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::TOO_MANY_REQUESTS => "QUOTA_EXCEEDED",
        StatusCode::SERVICE_UNAVAILABLE => "UNAVAILABLE",
        s if s.is_server_error() => "INTERNAL",
        _ => "UNKNOWN",
    }
}
