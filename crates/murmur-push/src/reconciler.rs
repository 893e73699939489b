use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::store::TokenStore;
use crate::token_fingerprint;
use crate::transport::DeliveryError;

/// Delivery outcome for one token of a dispatch batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub token: String,
    pub error: Option<DeliveryError>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tokens deleted from the store.
    pub pruned: usize,
    /// Tokens left alone because the rejection was transient.
    pub kept: usize,
    /// Removals that errored; the token stays until a later dispatch finds it again.
    pub failed: usize,
}

/// Removes tokens the provider reported as permanently invalid.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn TokenStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Best-effort: removal failures are logged and counted, never returned.
    pub async fn reconcile(&self, results: &[TokenResult]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut removals = Vec::new();

        for result in results {
            let Some(error) = &result.error else {
                continue;
            };

            if !error.permanent {
                debug!(
                    token = %token_fingerprint(&result.token),
                    reason = %error.reason,
                    "Keeping token after transient delivery failure"
                );
                report.kept += 1;
                continue;
            }

            let store = self.store.clone();
            let token = result.token.clone();
            removals.push(tokio::task::spawn_blocking(move || {
                let outcome = store.remove(&token);
                (token, outcome)
            }));
        }

        for joined in join_all(removals).await {
            match joined {
                Ok((token, Ok(removed))) => {
                    if removed {
                        report.pruned += 1;
                        info!(token = %token_fingerprint(&token), "Pruned invalid push token");
                    }
                }
                Ok((token, Err(e))) => {
                    report.failed += 1;
                    warn!(
                        token = %token_fingerprint(&token),
                        error = %e,
                        "Failed to prune invalid push token"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Token removal task failed: {}", e);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use murmur_db::{Database, TokenRegistration};
    use uuid::Uuid;

    /// Store whose deletes always fail.
    struct ReadOnlyStore(Database);

    impl TokenStore for ReadOnlyStore {
        fn register(&self, user_id: &str, token: &str) -> Result<TokenRegistration> {
            self.0.register_device_token(user_id, token)
        }

        fn list_tokens_for_user(&self, user_id: &str) -> Result<Vec<String>> {
            self.0.list_tokens_for_user(user_id)
        }

        fn remove(&self, _token: &str) -> Result<bool> {
            Err(anyhow!("database is locked"))
        }
    }

    fn seeded_db(tokens: &[&str]) -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4().to_string();
        db.create_user(&user, "u@example.com", "u", "hash").unwrap();
        for token in tokens {
            db.register_device_token(&user, token).unwrap();
        }
        (db, user)
    }

    fn ok(token: &str) -> TokenResult {
        TokenResult {
            token: token.into(),
            error: None,
        }
    }

    fn failed(token: &str, error: DeliveryError) -> TokenResult {
        TokenResult {
            token: token.into(),
            error: Some(error),
        }
    }

    #[tokio::test]
    async fn prunes_only_permanent_failures() {
        let (db, user) = seeded_db(&["good", "dead", "busy"]);
        let db = Arc::new(db);
        let reconciler = Reconciler::new(db.clone());

        let report = reconciler
            .reconcile(&[
                ok("good"),
                failed("dead", DeliveryError::permanent("unregistered")),
                failed("busy", DeliveryError::transient("unavailable")),
            ])
            .await;

        assert_eq!(report, ReconcileReport { pruned: 1, kept: 1, failed: 0 });

        let mut left = db.list_tokens_for_user(&user).unwrap();
        left.sort();
        assert_eq!(left, vec!["busy".to_string(), "good".to_string()]);
    }

    #[tokio::test]
    async fn removal_errors_are_swallowed() {
        let (db, user) = seeded_db(&["dead"]);
        let store = Arc::new(ReadOnlyStore(db));
        let reconciler = Reconciler::new(store.clone());

        let report = reconciler
            .reconcile(&[failed("dead", DeliveryError::permanent("unregistered"))])
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.pruned, 0);
        assert_eq!(store.0.list_tokens_for_user(&user).unwrap(), vec!["dead".to_string()]);
    }

    #[tokio::test]
    async fn token_already_gone_is_not_counted() {
        let (db, _user) = seeded_db(&[]);
        let reconciler = Reconciler::new(Arc::new(db));

        let report = reconciler
            .reconcile(&[failed("ghost", DeliveryError::permanent("unregistered"))])
            .await;

        assert_eq!(report, ReconcileReport::default());
    }
}
