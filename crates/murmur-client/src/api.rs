use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use murmur_types::api::{
    ApiResponse, AuthPayload, DispatchSummary, LikeToggle, MarkReadRequest, MarkReadResponse,
    NotificationPage, NotificationSelector, UnreadCount,
};
use murmur_types::models::{Comment, Post};

use crate::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Thin typed wrapper over the Murmur HTTP API.
///
/// Holds the session token once one is set; authenticated calls fail with
/// [`ClientError::NotSignedIn`] before touching the network when it is missing.
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    pub async fn is_signed_in(&self) -> bool {
        self.token.read().await.is_some()
    }

    // -- Auth --

    pub async fn signup(&self, email: &str, username: &str, password: &str) -> Result<AuthPayload, ClientError> {
        let body = json!({ "email": email, "username": username, "password": password });
        self.data(self.public(Method::POST, "/api/auth/signup").json(&body)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, ClientError> {
        let body = json!({ "email": email, "password": password });
        self.data(self.public(Method::POST, "/api/auth/login").json(&body)).await
    }

    // -- Notifications --

    pub async fn register_push_token(&self, token: &str) -> Result<(), ClientError> {
        let req = self
            .authed(Method::POST, "/api/notifications/register-token")
            .await?
            .json(&json!({ "token": token }));
        self.unit(req).await
    }

    pub async fn send_test_notification(&self) -> Result<DispatchSummary, ClientError> {
        let req = self.authed(Method::POST, "/api/notifications/test").await?;
        self.data(req).await
    }

    pub async fn notifications(&self, page: u32, limit: u32) -> Result<NotificationPage, ClientError> {
        let req = self
            .authed(Method::GET, "/api/notifications")
            .await?
            .query(&[("page", page), ("limit", limit)]);
        self.data(req).await
    }

    pub async fn unread_count(&self) -> Result<u64, ClientError> {
        let req = self.authed(Method::GET, "/api/notifications/unread-count").await?;
        let count: UnreadCount = self.data(req).await?;
        Ok(count.unread_count)
    }

    pub async fn mark_read(&self, selector: NotificationSelector) -> Result<MarkReadResponse, ClientError> {
        let req = self
            .authed(Method::PATCH, "/api/notifications/read")
            .await?
            .json(&MarkReadRequest {
                notification_ids: selector,
            });
        self.data(req).await
    }

    // -- Posts --

    pub async fn feed(&self, page: u32, limit: u32, username: Option<&str>) -> Result<Vec<Post>, ClientError> {
        #[derive(Serialize)]
        struct FeedParams<'a> {
            page: u32,
            limit: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            username: Option<&'a str>,
        }

        let req = self
            .authed(Method::GET, "/api/posts")
            .await?
            .query(&FeedParams { page, limit, username });
        self.data(req).await
    }

    pub async fn get_post(&self, post_id: Uuid) -> Result<Post, ClientError> {
        let req = self.authed(Method::GET, &format!("/api/posts/{}", post_id)).await?;
        self.data(req).await
    }

    pub async fn create_post(&self, content: &str) -> Result<Post, ClientError> {
        let req = self
            .authed(Method::POST, "/api/posts")
            .await?
            .json(&json!({ "content": content }));
        self.data(req).await
    }

    pub async fn toggle_like(&self, post_id: Uuid) -> Result<LikeToggle, ClientError> {
        let req = self
            .authed(Method::POST, &format!("/api/posts/{}/like", post_id))
            .await?;
        self.data(req).await
    }

    pub async fn comments(&self, post_id: Uuid) -> Result<Vec<Comment>, ClientError> {
        let req = self
            .authed(Method::GET, &format!("/api/posts/{}/comments", post_id))
            .await?;
        self.data(req).await
    }

    pub async fn comment(&self, post_id: Uuid, content: &str) -> Result<Comment, ClientError> {
        let req = self
            .authed(Method::POST, &format!("/api/posts/{}/comment", post_id))
            .await?
            .json(&json!({ "content": content }));
        self.data(req).await
    }

    // -- Plumbing --

    fn public(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    async fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let token = self.token.read().await.clone().ok_or(ClientError::NotSignedIn)?;
        Ok(self.public(method, path).bearer_auth(token))
    }

    async fn data<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        self.envelope::<T>(req).await?.data.ok_or(ClientError::MissingData)
    }

    async fn unit(&self, req: RequestBuilder) -> Result<(), ClientError> {
        self.envelope::<serde_json::Value>(req).await?;
        Ok(())
    }

    async fn envelope<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<ApiResponse<T>, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let message = resp
                .json::<ApiResponse<serde_json::Value>>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            return Err(ClientError::Api { status, message });
        }

        Ok(resp.json::<ApiResponse<T>>().await?)
    }
}
