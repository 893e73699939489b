use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use murmur_types::api::{ApiResponse, Claims, CreatePostRequest};
use murmur_types::models::Post;

use crate::error::ApiError;
use crate::views::{FeedQuery, Window, post_view};
use crate::{AppState, run_db};

const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 100;
pub(crate) const MAX_CONTENT_CHARS: usize = 500;

/// Trim and bound user-written text shared by posts and comments.
pub(crate) fn validate_content(raw: &str) -> Result<String, ApiError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ApiError::validation("Content is required"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::validation(format!(
            "Content must be at most {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    Ok(content.to_string())
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = validate_content(&req.content)?;

    let post_id = Uuid::new_v4();
    let (id, author) = (post_id.to_string(), claims.sub.to_string());
    let row = run_db(&state, move |db| {
        db.create_post(&id, &author, &content)?;
        db.get_post(&id, &author)
    })
    .await?
    .ok_or_else(|| anyhow::anyhow!("post {} vanished after insert", post_id))?;

    info!("{} created post {}", claims.username, post_id);

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(post_view(row)))))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<ApiResponse<Vec<Post>>>, ApiError> {
    let window = Window::new(query.page, query.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let username = query
        .username
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    let viewer = claims.sub.to_string();

    let rows = run_db(&state, move |db| {
        db.list_posts(&viewer, username.as_deref(), window.limit, window.offset)
    })
    .await?;

    Ok(Json(ApiResponse::ok(
        rows.into_iter().map(post_view).collect(),
    )))
}

pub async fn get_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Post>>, ApiError> {
    let (id, viewer) = (post_id.to_string(), claims.sub.to_string());
    let row = run_db(&state, move |db| db.get_post(&id, &viewer))
        .await?
        .ok_or(ApiError::NotFound("Post not found"))?;

    Ok(Json(ApiResponse::ok(post_view(row))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_trimmed() {
        assert_eq!(validate_content("  hello \n").unwrap(), "hello");
    }

    #[test]
    fn blank_and_oversized_content_rejected() {
        assert!(matches!(validate_content("   "), Err(ApiError::Validation(_))));
        let long = "é".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(validate_content(&long), Err(ApiError::Validation(_))));
        assert!(validate_content(&"é".repeat(MAX_CONTENT_CHARS)).is_ok());
    }
}
