use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use murmur_types::api::{DeliveryFailure, DispatchSummary};
use murmur_types::models::NotificationEvent;

use crate::reconciler::{Reconciler, TokenResult};
use crate::store::TokenStore;
use crate::transport::{PushMessage, PushTransport};

/// Fans a notification out to every device registered for a user.
///
/// Delivery is best-effort: nothing here returns an error to the caller.
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn PushTransport>,
    reconciler: Reconciler,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn TokenStore>, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                reconciler: Reconciler::new(store.clone()),
                store,
                transport,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    /// Send `event` to all of the user's devices and prune tokens the
    /// provider rejected permanently. Waits for every send and for the
    /// pruning before returning.
    pub async fn dispatch(&self, event: NotificationEvent) -> DispatchSummary {
        let user_id = event.user_id.to_string();

        let tokens = match self.list_tokens(&user_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Failed to load push tokens for user {}: {}", user_id, e);
                return DispatchSummary::default();
            }
        };

        if tokens.is_empty() {
            debug!("No push tokens registered for user {}", user_id);
            return DispatchSummary::default();
        }

        let messages: Vec<PushMessage> = tokens
            .into_iter()
            .map(|token| PushMessage {
                token,
                title: event.title.clone(),
                body: event.body.clone(),
                data: event.data.clone(),
            })
            .collect();

        let outcomes = match self.inner.transport.send_each(&messages).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!("Push transport failed for user {}: {}", user_id, e);
                return DispatchSummary::default();
            }
        };

        if outcomes.len() != messages.len() {
            warn!(
                "Push transport returned {} results for {} messages, ignoring batch",
                outcomes.len(),
                messages.len()
            );
            return DispatchSummary::default();
        }

        let results: Vec<TokenResult> = messages
            .into_iter()
            .zip(outcomes)
            .map(|(message, outcome)| TokenResult {
                token: message.token,
                error: outcome.err(),
            })
            .collect();

        let summary = summarize(&results);
        info!(
            "Sent {} of {} notifications to user {}",
            summary.success_count,
            results.len(),
            user_id
        );

        let report = self.inner.reconciler.reconcile(&results).await;
        if report.pruned > 0 || report.failed > 0 {
            info!(
                "Reconciled tokens for user {}: {} pruned, {} removal failures",
                user_id, report.pruned, report.failed
            );
        }

        summary
    }

    /// Dispatch on a detached task so the triggering request never waits on
    /// (or fails because of) push delivery.
    pub fn spawn_dispatch(&self, event: NotificationEvent) -> JoinHandle<DispatchSummary> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(event).await })
    }

    async fn list_tokens(&self, user_id: &str) -> anyhow::Result<Vec<String>> {
        let store = self.inner.store.clone();
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || store.list_tokens_for_user(&uid)).await?
    }
}

fn summarize(results: &[TokenResult]) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    for result in results {
        match &result.error {
            None => summary.success_count += 1,
            Some(error) => summary.failures.push(DeliveryFailure {
                token: result.token.clone(),
                reason: error.reason.clone(),
            }),
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use murmur_db::Database;
    use uuid::Uuid;

    use crate::transport::{DeliveryError, DeliveryOutcome, DisabledTransport, TransportError};

    /// Transport with canned per-token rejections that records what it was asked to send.
    #[derive(Default)]
    struct ScriptedTransport {
        rejections: HashMap<String, DeliveryError>,
        sent: Mutex<Vec<PushMessage>>,
    }

    impl ScriptedTransport {
        fn rejecting(token: &str, error: DeliveryError) -> Self {
            let mut rejections = HashMap::new();
            rejections.insert(token.to_string(), error);
            Self {
                rejections,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn send_each(&self, messages: &[PushMessage]) -> Result<Vec<DeliveryOutcome>, TransportError> {
            self.sent.lock().unwrap().extend_from_slice(messages);
            Ok(messages
                .iter()
                .map(|m| match self.rejections.get(&m.token) {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                })
                .collect())
        }
    }

    fn setup(tokens: &[&str]) -> (Arc<Database>, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        db.create_user(&user.to_string(), "u@example.com", "u", "hash")
            .unwrap();
        for token in tokens {
            db.register_device_token(&user.to_string(), token).unwrap();
        }
        (Arc::new(db), user)
    }

    fn sorted_tokens(db: &Database, user: Uuid) -> Vec<String> {
        let mut tokens = db.list_tokens_for_user(&user.to_string()).unwrap();
        tokens.sort();
        tokens
    }

    #[tokio::test]
    async fn user_without_tokens_gets_empty_summary() {
        let (db, user) = setup(&[]);
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = NotificationDispatcher::new(db, transport.clone());

        let summary = dispatcher
            .dispatch(NotificationEvent::new(user, "Hi", "body"))
            .await;

        assert_eq!(summary, DispatchSummary::default());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_token_is_reported_and_pruned() {
        let (db, user) = setup(&["tok1", "tok2"]);
        let transport = Arc::new(ScriptedTransport::rejecting(
            "tok2",
            DeliveryError::permanent("unregistered"),
        ));
        let dispatcher = NotificationDispatcher::new(db.clone(), transport);

        let summary = dispatcher
            .dispatch(NotificationEvent::new(user, "Hi", "body"))
            .await;

        assert_eq!(
            summary,
            DispatchSummary {
                success_count: 1,
                failures: vec![DeliveryFailure {
                    token: "tok2".into(),
                    reason: "unregistered".into(),
                }],
            }
        );
        assert_eq!(sorted_tokens(&db, user), vec!["tok1".to_string()]);
    }

    #[tokio::test]
    async fn every_device_gets_the_same_payload() {
        let (db, user) = setup(&["phone", "tablet"]);
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = NotificationDispatcher::new(db, transport.clone());

        let event = NotificationEvent::new(user, "New like", "bob liked your post")
            .with_data("type", "like")
            .with_data("postId", "p1");
        let summary = dispatcher.dispatch(event.clone()).await;
        assert_eq!(summary.success_count, 2);

        let sent = transport.sent.lock().unwrap();
        let mut destinations: Vec<&str> = sent.iter().map(|m| m.token.as_str()).collect();
        destinations.sort();
        assert_eq!(destinations, vec!["phone", "tablet"]);
        for message in sent.iter() {
            assert_eq!(message.title, event.title);
            assert_eq!(message.body, event.body);
            assert_eq!(message.data, event.data);
        }
    }

    #[tokio::test]
    async fn transient_failure_is_reported_but_token_kept() {
        let (db, user) = setup(&["tok1"]);
        let transport = Arc::new(ScriptedTransport::rejecting(
            "tok1",
            DeliveryError::transient("unavailable"),
        ));
        let dispatcher = NotificationDispatcher::new(db.clone(), transport);

        let summary = dispatcher
            .dispatch(NotificationEvent::new(user, "Hi", "body"))
            .await;

        assert_eq!(summary.success_count, 0);
        assert_eq!(summary.failures[0].reason, "unavailable");
        assert_eq!(sorted_tokens(&db, user), vec!["tok1".to_string()]);
    }

    #[tokio::test]
    async fn transport_outage_yields_empty_summary_and_keeps_tokens() {
        let (db, user) = setup(&["tok1", "tok2"]);
        let dispatcher = NotificationDispatcher::new(db.clone(), Arc::new(DisabledTransport));

        let summary = dispatcher
            .dispatch(NotificationEvent::new(user, "Hi", "body"))
            .await;

        assert_eq!(summary, DispatchSummary::default());
        assert_eq!(sorted_tokens(&db, user).len(), 2);
    }

    #[tokio::test]
    async fn spawned_dispatch_completes_in_background() {
        let (db, user) = setup(&["tok1"]);
        let dispatcher = NotificationDispatcher::new(db, Arc::new(ScriptedTransport::default()));

        let handle = dispatcher.spawn_dispatch(NotificationEvent::new(user, "Hi", "body"));
        assert_eq!(handle.await.unwrap().success_count, 1);
    }
}
