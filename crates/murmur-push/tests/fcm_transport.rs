//! Drives the FCM transport against a local axum server that speaks just
//! enough of the HTTP v1 API.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use serde_json::{Value, json};

use murmur_push::{DeliveryError, FcmCredentials, FcmTransport, PushConfig, PushMessage, PushTransport};

const ACCESS_TOKEN: &str = "ya29.test-token";

#[derive(Clone, Default)]
struct FakeFcm {
    received: Arc<Mutex<Vec<Value>>>,
}

async fn send(
    State(fake): State<FakeFcm>,
    Path(project): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", ACCESS_TOKEN))
        .unwrap_or(false);
    if !authorized || project != "murmur-test" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "code": 401, "status": "UNAUTHENTICATED" } })),
        );
    }

    fake.received.lock().unwrap().push(body.clone());

    let token = body["message"]["token"].as_str().unwrap_or_default();
    if token.starts_with("dead") {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "code": 404,
                    "status": "NOT_FOUND",
                    "details": [{
                        "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                        "errorCode": "UNREGISTERED"
                    }]
                }
            })),
        )
    } else if token.starts_with("busy") {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": { "code": 503, "status": "UNAVAILABLE" } })),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({ "name": format!("projects/{}/messages/1", project) })),
        )
    }
}

async fn start_fake_fcm() -> (SocketAddr, FakeFcm) {
    let fake = FakeFcm::default();
    let app = Router::new()
        .route("/v1/projects/{project}/messages:send", post(send))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, fake)
}

fn transport_for(addr: SocketAddr, access_token: &str) -> FcmTransport {
    let mut config = PushConfig::new(
        "murmur-test",
        FcmCredentials::AccessToken(access_token.to_string()),
    );
    config.fcm_base_url = format!("http://{}", addr);
    FcmTransport::new(config).unwrap()
}

fn message(token: &str) -> PushMessage {
    PushMessage {
        token: token.to_string(),
        title: "New like".to_string(),
        body: "bob liked your post".to_string(),
        data: [("type".to_string(), "like".to_string())].into_iter().collect(),
    }
}

#[tokio::test]
async fn outcomes_line_up_with_messages() {
    let (addr, fake) = start_fake_fcm().await;
    let transport = transport_for(addr, ACCESS_TOKEN);

    let outcomes = transport
        .send_each(&[message("live-1"), message("dead-1"), message("busy-1")])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], Ok(()));
    assert_eq!(outcomes[1], Err(DeliveryError::permanent("unregistered")));
    assert_eq!(outcomes[2], Err(DeliveryError::transient("unavailable")));
    assert_eq!(fake.received.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn payload_follows_v1_message_shape() {
    let (addr, fake) = start_fake_fcm().await;
    let transport = transport_for(addr, ACCESS_TOKEN);

    transport.send_each(&[message("live-1")]).await.unwrap();

    let received = fake.received.lock().unwrap();
    let msg = &received[0]["message"];
    assert_eq!(msg["token"], "live-1");
    assert_eq!(msg["notification"]["title"], "New like");
    assert_eq!(msg["notification"]["body"], "bob liked your post");
    assert_eq!(msg["data"]["type"], "like");
}

#[tokio::test]
async fn rejected_credentials_do_not_prune() {
    let (addr, _fake) = start_fake_fcm().await;
    let transport = transport_for(addr, "expired");

    let outcomes = transport.send_each(&[message("live-1")]).await.unwrap();
    let error = outcomes[0].clone().unwrap_err();
    assert_eq!(error.reason, "unauthenticated");
    assert!(!error.permanent);
}

#[tokio::test]
async fn unreachable_provider_is_transient() {
    // Grab a free port, then close it so nothing is listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = transport_for(addr, ACCESS_TOKEN);
    let outcomes = transport.send_each(&[message("live-1")]).await.unwrap();
    assert_eq!(outcomes[0], Err(DeliveryError::transient("unavailable")));
}
