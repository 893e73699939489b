use axum::{
    Extension, Json,
    extract::{Query, State},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_db::TokenRegistration;
use murmur_push::token_fingerprint;
use murmur_types::api::{
    ApiResponse, Claims, DispatchSummary, MarkReadRequest, MarkReadResponse, NotificationPage,
    NotificationSelector, RegisterTokenRequest, UnreadCount,
};
use murmur_types::models::{NotificationEvent, NotificationKind};

use crate::error::ApiError;
use crate::views::{PageQuery, Window, notification_view};
use crate::{AppState, run_db};

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

pub async fn register_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterTokenRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let token = req
        .token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("Token is required"))?;

    let store = state.notifier.store().clone();
    let user_id = claims.sub.to_string();
    let fingerprint = token_fingerprint(&token);

    let outcome =
        tokio::task::spawn_blocking(move || store.register(&user_id, &token)).await??;

    match outcome {
        TokenRegistration::Created => {
            info!(token = %fingerprint, "Registered push token for {}", claims.username)
        }
        TokenRegistration::Reassigned { previous_owner } => info!(
            token = %fingerprint,
            "Push token moved from user {} to {}",
            previous_owner, claims.sub
        ),
        TokenRegistration::Unchanged => {
            debug!(token = %fingerprint, "Push token already registered for {}", claims.username)
        }
    }

    Ok(Json(ApiResponse::message("FCM token registered successfully")))
}

/// Push a fixed message to every device of the caller and report how it went.
pub async fn send_test(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<ApiResponse<DispatchSummary>> {
    let event = NotificationEvent::new(
        claims.sub,
        "Test notification",
        "Push notifications are working",
    )
    .with_data("type", "test");

    let summary = state.notifier.dispatch(event).await;
    Json(ApiResponse::ok(summary))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<NotificationPage>>, ApiError> {
    let window = Window::new(query.page, query.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let user_id = claims.sub.to_string();

    let (rows, unread) = run_db(&state, move |db| {
        let rows = db.get_notifications(&user_id, window.limit, window.offset)?;
        let unread = db.count_unread_notifications(&user_id)?;
        Ok((rows, unread))
    })
    .await?;

    Ok(Json(ApiResponse::ok(NotificationPage {
        notifications: rows.into_iter().filter_map(notification_view).collect(),
        unread_count: unread.max(0) as u64,
        page: window.page,
        limit: window.limit,
    })))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<UnreadCount>>, ApiError> {
    let user_id = claims.sub.to_string();
    let count = run_db(&state, move |db| db.count_unread_notifications(&user_id)).await?;

    Ok(Json(ApiResponse::ok(UnreadCount {
        unread_count: count.max(0) as u64,
    })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<ApiResponse<MarkReadResponse>>, ApiError> {
    let ids = match req.notification_ids {
        NotificationSelector::All(_) => None,
        NotificationSelector::Ids(ids) if ids.is_empty() => {
            return Err(ApiError::validation(
                "notificationIds must be a non-empty list or \"all\"",
            ));
        }
        NotificationSelector::Ids(ids) if ids.len() > MAX_LIMIT as usize => {
            return Err(ApiError::validation(format!(
                "notificationIds may name at most {} notifications",
                MAX_LIMIT
            )));
        }
        NotificationSelector::Ids(ids) => {
            Some(ids.iter().map(Uuid::to_string).collect::<Vec<_>>())
        }
    };

    let user_id = claims.sub.to_string();
    let (updated, unread) = run_db(&state, move |db| {
        let updated = match ids {
            Some(ids) => db.mark_notifications_read(&user_id, &ids)?,
            None => db.mark_all_notifications_read(&user_id)?,
        };
        let unread = db.count_unread_notifications(&user_id)?;
        Ok((updated, unread))
    })
    .await?;

    debug!("Marked {} notifications read for {}", updated, claims.username);

    Ok(Json(ApiResponse::ok(MarkReadResponse {
        updated: updated as u64,
        unread_count: unread.max(0) as u64,
    })))
}

/// Record an in-app notification for a post author and push it to their
/// devices. Never fails the calling request: storage errors are logged and
/// delivery runs on a detached task.
pub(crate) async fn notify_post_author(
    state: &AppState,
    author_id: Uuid,
    actor: &Claims,
    kind: NotificationKind,
    post_id: Uuid,
    body: String,
) {
    if author_id == actor.sub {
        return;
    }

    let title = match kind {
        NotificationKind::Like => "New like",
        NotificationKind::Comment => "New comment",
    };

    let (id, user, actor_id, post, message) = (
        Uuid::new_v4().to_string(),
        author_id.to_string(),
        actor.sub.to_string(),
        post_id.to_string(),
        body.clone(),
    );
    let stored = run_db(state, move |db| {
        db.insert_notification(&id, &user, &actor_id, kind.as_str(), Some(&post), &message)
    })
    .await;
    if let Err(e) = stored {
        warn!("Failed to record {} notification for {}: {}", kind.as_str(), author_id, e);
    }

    let event = NotificationEvent::new(author_id, title, body)
        .with_data("type", kind.as_str())
        .with_data("postId", post_id.to_string());
    state.notifier.spawn_dispatch(event);
}
