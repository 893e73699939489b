use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use murmur_types::api::{ApiResponse, Claims, CommentRequest};
use murmur_types::models::{Comment, NotificationKind};

use crate::error::ApiError;
use crate::notifications::notify_post_author;
use crate::posts::validate_content;
use crate::views::comment_view;
use crate::{AppState, run_db};

const PREVIEW_CHARS: usize = 80;

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<Vec<Comment>>>, ApiError> {
    let (id, viewer) = (post_id.to_string(), claims.sub.to_string());
    let rows = run_db(&state, move |db| {
        if db.get_post(&id, &viewer)?.is_none() {
            return Ok(None);
        }
        db.get_comments(&id).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("Post not found"))?;

    Ok(Json(ApiResponse::ok(
        rows.into_iter().map(comment_view).collect(),
    )))
}

pub async fn comment_on_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = validate_content(&req.content)?;

    let comment_id = Uuid::new_v4();
    let (id, post, author) = (
        comment_id.to_string(),
        post_id.to_string(),
        claims.sub.to_string(),
    );
    let text = content.clone();
    let (post_author, row) = run_db(&state, move |db| {
        let Some(target) = db.get_post(&post, &author)? else {
            return Ok(None);
        };
        db.insert_comment(&id, &post, &author, &text)?;
        let row = db
            .get_comment(&id)?
            .ok_or_else(|| anyhow::anyhow!("comment {} vanished after insert", id))?;
        Ok(Some((target.author_id, row)))
    })
    .await?
    .ok_or(ApiError::NotFound("Post not found"))?;

    info!("{} commented on post {}", claims.username, post_id);

    let post_author: Uuid = post_author
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt author id '{}': {}", post_author, e))?;
    notify_post_author(
        &state,
        post_author,
        &claims,
        NotificationKind::Comment,
        post_id,
        format!("{} commented: {}", claims.username, preview(&content)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(comment_view(row)))))
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut short: String = content.chars().take(PREVIEW_CHARS - 1).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_comments_are_not_truncated() {
        assert_eq!(preview("nice post"), "nice post");
    }

    #[test]
    fn long_comments_are_cut_to_preview_length() {
        let long = "a".repeat(200);
        let short = preview(&long);
        assert_eq!(short.chars().count(), PREVIEW_CHARS);
        assert!(short.ends_with('…'));
    }
}
