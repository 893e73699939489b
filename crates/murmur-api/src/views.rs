//! Row → API model conversion and shared query parameters.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use murmur_db::models::{CommentRow, NotificationRow, PostRow};
use murmur_db::parse_timestamp;
use murmur_types::models::{Comment, Notification, NotificationKind, Post};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub username: Option<String>,
}

/// Resolved 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub page: u32,
    pub limit: u32,
    pub offset: u32,
}

impl Window {
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(default_limit).clamp(1, max_limit);
        Self {
            page,
            limit,
            offset: (page - 1).saturating_mul(limit),
        }
    }
}

fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn parse_time(raw: &str, what: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Corrupt created_at '{}' on {}", raw, what);
        DateTime::default()
    })
}

pub fn post_view(row: PostRow) -> Post {
    Post {
        id: parse_id(&row.id, "post id"),
        author_id: parse_id(&row.author_id, "author_id"),
        author_username: row.author_username,
        content: row.content,
        like_count: row.like_count.max(0) as u64,
        comment_count: row.comment_count.max(0) as u64,
        liked: row.liked,
        created_at: parse_time(&row.created_at, "post"),
    }
}

pub fn comment_view(row: CommentRow) -> Comment {
    Comment {
        id: parse_id(&row.id, "comment id"),
        post_id: parse_id(&row.post_id, "post_id"),
        author_id: parse_id(&row.author_id, "author_id"),
        author_username: row.author_username,
        content: row.content,
        created_at: parse_time(&row.created_at, "comment"),
    }
}

/// Rows with an unknown kind are skipped rather than failing the whole page.
pub fn notification_view(row: NotificationRow) -> Option<Notification> {
    let Some(kind) = NotificationKind::parse(&row.kind) else {
        warn!("Unknown notification kind '{}' on {}", row.kind, row.id);
        return None;
    };

    Some(Notification {
        id: parse_id(&row.id, "notification id"),
        kind,
        actor_id: parse_id(&row.actor_id, "actor_id"),
        actor_username: row.actor_username,
        post_id: row.post_id.as_deref().map(|id| parse_id(id, "post_id")),
        message: row.message,
        read: row.read,
        created_at: parse_time(&row.created_at, "notification"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_defaults_and_clamps() {
        assert_eq!(
            Window::new(None, None, 20, 100),
            Window { page: 1, limit: 20, offset: 0 }
        );
        assert_eq!(
            Window::new(Some(3), Some(10), 20, 100),
            Window { page: 3, limit: 10, offset: 20 }
        );
        assert_eq!(Window::new(Some(0), Some(0), 20, 100).page, 1);
        assert_eq!(Window::new(Some(0), Some(0), 20, 100).limit, 1);
        assert_eq!(Window::new(None, Some(500), 20, 100).limit, 100);
    }

    #[test]
    fn unknown_notification_kind_is_skipped() {
        let row = NotificationRow {
            id: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4().to_string(),
            actor_id: Uuid::new_v4().to_string(),
            actor_username: "bob".into(),
            kind: "poke".into(),
            post_id: None,
            message: "bob poked you".into(),
            read: false,
            created_at: "2024-01-01 00:00:00".into(),
        };
        assert!(notification_view(row).is_none());
    }
}
