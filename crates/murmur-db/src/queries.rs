use crate::Database;
use crate::models::{CommentRow, DeviceTokenRow, NotificationRow, PostRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};

/// What `register_device_token` did to the token table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRegistration {
    Created,
    Reassigned { previous_owner: String },
    Unchanged,
}

const POST_SELECT: &str = "
    SELECT p.id, p.author_id, u.username, p.content,
           (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id),
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id),
           EXISTS(SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?1),
           p.created_at
    FROM posts p
    JOIN users u ON u.id = p.author_id";

const COMMENT_SELECT: &str = "
    SELECT c.id, c.post_id, c.author_id, u.username, c.content, c.created_at
    FROM comments c
    JOIN users u ON u.id = c.author_id";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, email: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, username, password) VALUES (?1, ?2, ?3, ?4)",
                (id, email, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Device tokens --

    /// Upsert keyed by token. The owner lookup and the write share one
    /// immediate transaction so concurrent registrations cannot interleave.
    pub fn register_device_token(&self, user_id: &str, token: &str) -> Result<TokenRegistration> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let previous: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM device_tokens WHERE token = ?1",
                    [token],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "INSERT INTO device_tokens (token, user_id) VALUES (?1, ?2)
                 ON CONFLICT(token) DO UPDATE
                    SET user_id = excluded.user_id, updated_at = datetime('now')
                    WHERE device_tokens.user_id != excluded.user_id",
                (token, user_id),
            )?;
            tx.commit()?;

            Ok(match previous {
                None => TokenRegistration::Created,
                Some(owner) if owner == user_id => TokenRegistration::Unchanged,
                Some(owner) => TokenRegistration::Reassigned { previous_owner: owner },
            })
        })
    }

    pub fn list_tokens_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT token FROM device_tokens WHERE user_id = ?1")?;
            let tokens = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(tokens)
        })
    }

    /// Returns whether a row was deleted. Unknown tokens are not an error.
    pub fn remove_device_token(&self, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM device_tokens WHERE token = ?1", [token])?;
            Ok(deleted > 0)
        })
    }

    pub fn get_device_token(&self, token: &str) -> Result<Option<DeviceTokenRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT token, user_id, created_at, updated_at FROM device_tokens WHERE token = ?1",
                    [token],
                    |row| {
                        Ok(DeviceTokenRow {
                            token: row.get(0)?,
                            user_id: row.get(1)?,
                            created_at: row.get(2)?,
                            updated_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Posts --

    pub fn create_post(&self, id: &str, author_id: &str, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, content) VALUES (?1, ?2, ?3)",
                (id, author_id, content),
            )?;
            Ok(())
        })
    }

    /// `viewer_id` decides the `liked` flag on the returned row.
    pub fn get_post(&self, id: &str, viewer_id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE p.id = ?2", POST_SELECT);
            let row = conn
                .query_row(&sql, [viewer_id, id], map_post)
                .optional()?;
            Ok(row)
        })
    }

    /// Newest first. `username` restricts the feed to one author.
    pub fn list_posts(
        &self,
        viewer_id: &str,
        username: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE (?2 IS NULL OR u.username = ?2)
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?3 OFFSET ?4",
                POST_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![viewer_id, username, limit, offset], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Likes --

    /// Toggle a like: removes if present, inserts if not.
    /// Returns (liked, like_count) after the change.
    pub fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<(bool, i64)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let removed = tx.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                (post_id, user_id),
            )?;
            let liked = if removed == 0 {
                tx.execute(
                    "INSERT INTO post_likes (post_id, user_id) VALUES (?1, ?2)",
                    (post_id, user_id),
                )?;
                true
            } else {
                false
            };

            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            tx.commit()?;

            Ok((liked, count))
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, id: &str, post_id: &str, author_id: &str, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, content) VALUES (?1, ?2, ?3, ?4)",
                (id, post_id, author_id, content),
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.id = ?1", COMMENT_SELECT);
            let row = conn.query_row(&sql, [id], map_comment).optional()?;
            Ok(row)
        })
    }

    /// Oldest first, the order a thread is read in.
    pub fn get_comments(&self, post_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE c.post_id = ?1 ORDER BY c.created_at ASC, c.rowid ASC",
                COMMENT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([post_id], map_comment)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        id: &str,
        user_id: &str,
        actor_id: &str,
        kind: &str,
        post_id: Option<&str>,
        message: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, actor_id, kind, post_id, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, user_id, actor_id, kind, post_id, message],
            )?;
            Ok(())
        })
    }

    pub fn get_notifications(&self, user_id: &str, limit: u32, offset: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.user_id, n.actor_id, u.username, n.kind, n.post_id,
                        n.message, n.read, n.created_at
                 FROM notifications n
                 LEFT JOIN users u ON u.id = n.actor_id
                 WHERE n.user_id = ?1
                 ORDER BY n.created_at DESC, n.rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit, offset], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        actor_id: row.get(2)?,
                        actor_username: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        kind: row.get(4)?,
                        post_id: row.get(5)?,
                        message: row.get(6)?,
                        read: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_unread_notifications(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Marks the given notifications read. Ids belonging to other users are
    /// ignored. Returns the number of rows that flipped from unread to read.
    pub fn mark_notifications_read(&self, user_id: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE notifications SET read = 1
                 WHERE user_id = ?1 AND read = 0 AND id IN ({})",
                placeholders.join(", ")
            );

            let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(ids.len() + 1);
            params.push(&user_id);
            params.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let updated = conn.execute(&sql, params.as_slice())?;
            Ok(updated)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id],
            )?;
            Ok(updated)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input.
    let sql = format!(
        "SELECT id, email, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                username: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_username: row.get(2)?,
        content: row.get(3)?,
        like_count: row.get(4)?,
        comment_count: row.get(5)?,
        liked: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_username: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}
