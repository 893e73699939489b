use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use murmur_push::{FcmCredentials, PushConfig};

/// Secrets shipped in sample `.env` files; refusing them keeps a copied
/// example config from going to production unnoticed.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "secret", "changeme"];

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// `None` runs the server with push delivery switched off.
    pub push: Option<PushConfig>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup, so tests don't touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = var("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match var("MURMUR_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid MURMUR_PORT '{}'", raw))?,
            None => 3000,
        };
        let db_path = PathBuf::from(var("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into()));

        let jwt_secret = var("MURMUR_JWT_SECRET").context("MURMUR_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MURMUR_JWT_SECRET is still a placeholder value");
        }

        let push = push_config(&var)?;

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            push,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .with_context(|| format!("Invalid listen address '{}'", addr))
    }
}

fn push_config(var: &impl Fn(&str) -> Option<String>) -> anyhow::Result<Option<PushConfig>> {
    let Some(project_id) = var("FIREBASE_PROJECT_ID") else {
        return Ok(None);
    };

    let credentials = match (
        var("MURMUR_FCM_ACCESS_TOKEN"),
        var("FIREBASE_CLIENT_EMAIL"),
        var("FIREBASE_PRIVATE_KEY"),
    ) {
        (Some(token), _, _) => FcmCredentials::AccessToken(token),
        (None, Some(client_email), Some(private_key)) => FcmCredentials::ServiceAccount {
            client_email,
            // Keys pasted into .env files usually carry literal "\n" sequences.
            private_key: private_key.replace("\\n", "\n"),
        },
        _ => bail!(
            "FIREBASE_PROJECT_ID is set but neither MURMUR_FCM_ACCESS_TOKEN nor \
             FIREBASE_CLIENT_EMAIL and FIREBASE_PRIVATE_KEY are"
        ),
    };

    let mut config = PushConfig::new(project_id, credentials);
    if let Some(url) = var("MURMUR_FCM_BASE_URL") {
        config.fcm_base_url = url;
    }
    if let Some(url) = var("MURMUR_FCM_TOKEN_URL") {
        config.token_url = url;
    }
    Ok(Some(config))
}
