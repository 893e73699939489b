use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_types::api::{AuthPayload, LikeToggle, MarkReadResponse, NotificationSelector};

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::unread::{DEFAULT_POLL_INTERVAL, Generation, UnreadCounter};

/// A signed-in (or not yet signed-in) user: the API client plus the state
/// a UI layer observes. Create one per app instance and hand it around.
pub struct Session {
    api: Arc<ApiClient>,
    unread: UnreadCounter,
    user: RwLock<Option<AuthPayload>>,
}

impl Session {
    pub fn new(api: ApiClient) -> Self {
        Self::with_poll_interval(api, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(api: ApiClient, interval: Duration) -> Self {
        let api = Arc::new(api);
        Self {
            unread: UnreadCounter::with_interval(api.clone(), interval),
            api,
            user: RwLock::new(None),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn unread(&self) -> &UnreadCounter {
        &self.unread
    }

    pub async fn user(&self) -> Option<AuthPayload> {
        self.user.read().await.clone()
    }

    pub async fn signup(&self, email: &str, username: &str, password: &str) -> Result<AuthPayload, ClientError> {
        let auth = self.api.signup(email, username, password).await?;
        self.start(auth.clone()).await;
        Ok(auth)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, ClientError> {
        let auth = self.api.login(email, password).await?;
        self.start(auth.clone()).await;
        Ok(auth)
    }

    pub async fn logout(&self) {
        self.unread.sign_out();
        self.api.clear_token().await;
        if let Some(user) = self.user.write().await.take() {
            info!("Signed out {}", user.username);
        }
    }

    async fn start(&self, auth: AuthPayload) {
        self.api.set_token(auth.token.clone()).await;
        info!("Signed in as {}", auth.username);
        *self.user.write().await = Some(auth);
        self.unread.sign_in().await;
    }

    pub async fn register_push_token(&self, token: &str) -> Result<(), ClientError> {
        self.api.register_push_token(token).await
    }

    /// Mark the given notifications read. The local counter drops at once;
    /// the count in the server's reply then replaces it.
    pub async fn mark_notifications_read(&self, ids: Vec<Uuid>) -> Result<MarkReadResponse, ClientError> {
        if ids.is_empty() {
            return Err(ClientError::Api {
                status: reqwest::StatusCode::BAD_REQUEST,
                message: "no notifications selected".into(),
            });
        }

        let generation = self.unread.generation();
        self.unread.mark_read(ids.len() as u64);
        self.settle(generation, self.api.mark_read(NotificationSelector::Ids(ids)).await)
            .await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<MarkReadResponse, ClientError> {
        let generation = self.unread.generation();
        self.unread.mark_read(self.unread.current().count());
        self.settle(generation, self.api.mark_read(NotificationSelector::all()).await)
            .await
    }

    pub async fn toggle_like(&self, post_id: Uuid) -> Result<LikeToggle, ClientError> {
        self.api.toggle_like(post_id).await
    }

    /// The reply's count only lands if no sign-out or sign-in happened while
    /// the request was out.
    async fn settle(
        &self,
        generation: Generation,
        result: Result<MarkReadResponse, ClientError>,
    ) -> Result<MarkReadResponse, ClientError> {
        match result {
            Ok(resp) => {
                self.unread.apply_server_count_for(generation, resp.unread_count);
                Ok(resp)
            }
            Err(e) => {
                warn!("Mark-read failed, resyncing unread count: {}", e);
                self.unread.refresh().await;
                Err(e)
            }
        }
    }
}
