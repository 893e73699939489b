use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;
use uuid::Uuid;

use murmur_types::api::{ApiResponse, Claims, LikeToggle};
use murmur_types::models::NotificationKind;

use crate::error::ApiError;
use crate::notifications::notify_post_author;
use crate::{AppState, run_db};

/// Like the post if the caller hasn't yet, otherwise take the like back.
/// Only the like (not the unlike) notifies the author.
pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<ApiResponse<LikeToggle>>, ApiError> {
    let (id, user) = (post_id.to_string(), claims.sub.to_string());
    let (author_id, liked, like_count) = run_db(&state, move |db| {
        let Some(post) = db.get_post(&id, &user)? else {
            return Ok(None);
        };
        let (liked, count) = db.toggle_like(&id, &user)?;
        Ok(Some((post.author_id, liked, count)))
    })
    .await?
    .ok_or(ApiError::NotFound("Post not found"))?;

    debug!("{} {} post {}", claims.username, if liked { "liked" } else { "unliked" }, post_id);

    if liked {
        let author_id: Uuid = author_id
            .parse()
            .map_err(|e| anyhow::anyhow!("corrupt author id '{}': {}", author_id, e))?;
        notify_post_author(
            &state,
            author_id,
            &claims,
            NotificationKind::Like,
            post_id,
            format!("{} liked your post", claims.username),
        )
        .await;
    }

    Ok(Json(ApiResponse::ok(LikeToggle {
        liked,
        like_count: like_count.max(0) as u64,
    })))
}
