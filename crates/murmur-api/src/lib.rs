pub mod auth;
pub mod comments;
pub mod error;
pub mod likes;
pub mod middleware;
pub mod notifications;
pub mod posts;
mod views;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, patch, post},
};

use murmur_db::Database;
use murmur_push::{NotificationDispatcher, PushTransport};
use murmur_types::api::ApiResponse;

use crate::error::ApiError;
use crate::middleware::require_auth;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub notifier: NotificationDispatcher,
}

impl AppStateInner {
    /// Wire the dispatcher to the same database that backs the API.
    pub fn new(db: Arc<Database>, jwt_secret: String, transport: Arc<dyn PushTransport>) -> AppState {
        let notifier = NotificationDispatcher::new(db.clone(), transport);
        Arc::new(Self {
            db,
            jwt_secret,
            notifier,
        })
    }
}

/// All HTTP routes. CORS and request tracing are layered on by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/unread-count", get(notifications::unread_count))
        .route("/api/notifications/read", patch(notifications::mark_read))
        .route("/api/notifications/register-token", post(notifications::register_token))
        .route("/api/notifications/test", post(notifications::send_test))
        .route("/api/posts", get(posts::list_posts).post(posts::create_post))
        .route("/api/posts/{post_id}", get(posts::get_post))
        .route("/api/posts/{post_id}/like", post(likes::toggle_like))
        .route("/api/posts/{post_id}/comments", get(comments::list_comments))
        .route("/api/posts/{post_id}/comment", post(comments::comment_on_post))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));

    public_routes.merge(protected_routes).with_state(state)
}

async fn health() -> Json<ApiResponse<()>> {
    Json(ApiResponse::message("ok"))
}

/// Run a blocking database call off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    let value = tokio::task::spawn_blocking(move || f(&db)).await??;
    Ok(value)
}
