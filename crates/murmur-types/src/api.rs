use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Notification;

// -- JWT Claims --

/// Session token claims, shared by the API middleware and anything else
/// that needs to validate a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Envelope --

/// Every JSON response is wrapped in `{ success, message?, data? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
}

// -- Push tokens --

/// `token` is optional at the serde level so a missing field becomes a
/// validation error rather than a generic body rejection.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegisterTokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub token: String,
    pub reason: String,
}

/// Outcome of one fan-out to all devices of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub success_count: usize,
    pub failures: Vec<DeliveryFailure>,
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllMarker {
    All,
}

/// Either an explicit list of notification ids or the literal string `"all"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationSelector {
    All(AllMarker),
    Ids(Vec<Uuid>),
}

impl NotificationSelector {
    pub fn all() -> Self {
        Self::All(AllMarker::All)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub notification_ids: NotificationSelector,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub updated: u64,
    pub unread_count: u64,
}

// -- Posts --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeToggle {
    pub liked: bool,
    pub like_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_accepts_all_keyword() {
        let req: MarkReadRequest =
            serde_json::from_str(r#"{"notificationIds":"all"}"#).unwrap();
        assert_eq!(req.notification_ids, NotificationSelector::all());
    }

    #[test]
    fn selector_accepts_id_list() {
        let id = Uuid::new_v4();
        let body = format!(r#"{{"notificationIds":["{}"]}}"#, id);
        let req: MarkReadRequest = serde_json::from_str(&body).unwrap();
        assert_eq!(req.notification_ids, NotificationSelector::Ids(vec![id]));
    }

    #[test]
    fn selector_rejects_other_keywords() {
        let result: Result<MarkReadRequest, _> =
            serde_json::from_str(r#"{"notificationIds":"some"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let json = serde_json::to_value(ApiResponse::message("done")).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "message": "done" }));
    }

    fn parse_envelope<T: serde::de::DeserializeOwned>(raw: &str) -> ApiResponse<T> {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn envelope_parses_for_any_payload_type() {
        let empty: ApiResponse<DispatchSummary> = parse_envelope(r#"{"success":true}"#);
        assert!(empty.data.is_none());
        assert!(empty.message.is_none());

        let count: ApiResponse<UnreadCount> =
            parse_envelope(r#"{"success":true,"data":{"unreadCount":3}}"#);
        assert_eq!(count.data.unwrap().unread_count, 3);
    }

    #[test]
    fn summary_uses_camel_case() {
        let summary = DispatchSummary {
            success_count: 1,
            failures: vec![DeliveryFailure {
                token: "tok2".into(),
                reason: "unregistered".into(),
            }],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["successCount"], 1);
        assert_eq!(json["failures"][0]["reason"], "unregistered");
    }
}
