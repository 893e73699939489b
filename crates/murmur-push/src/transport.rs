use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// One message addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

/// The provider refused a single message.
///
/// `permanent` means the token itself is dead (uninstalled app, malformed
/// token) and should be pruned. Transient rejections only drop this send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError {
    pub reason: String,
    pub permanent: bool,
}

impl DeliveryError {
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            permanent: true,
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            permanent: false,
        }
    }
}

pub type DeliveryOutcome = Result<(), DeliveryError>;

/// The whole batch could not be attempted.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("push transport is not configured")]
    NotConfigured,

    #[error("failed to sign service account assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("access token request rejected: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Capability boundary to the external push provider.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Attempt every message. Returns one outcome per message, in order.
    async fn send_each(&self, messages: &[PushMessage]) -> Result<Vec<DeliveryOutcome>, TransportError>;
}

/// Stand-in used when no provider credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTransport;

#[async_trait]
impl PushTransport for DisabledTransport {
    async fn send_each(&self, _messages: &[PushMessage]) -> Result<Vec<DeliveryOutcome>, TransportError> {
        Err(TransportError::NotConfigured)
    }
}
