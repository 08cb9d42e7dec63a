use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use huddle_api::{create_router, AppState};
use huddle_core::connection::{self, memory};
use huddle_core::{Config, MessageKind, RouteQuota, SignalingServer};
use huddle_sfu::{SessionFactory, SfuConfig, WebRtcSessionFactory};

fn build(config: Config) -> (Router, Arc<SignalingServer>) {
    let factory: Arc<dyn SessionFactory> =
        Arc::new(WebRtcSessionFactory::new(SfuConfig::default()).unwrap());
    let server = SignalingServer::new(config.signaling.clone(), factory);
    let state = AppState::new(Arc::clone(&server), Arc::new(config));
    (create_router(state), server)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (router, _) = build(Config::default());
    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_create_room_stub() {
    let (router, _) = build(Config::default());
    let request = Request::builder()
        .method("POST")
        .uri("/api/rooms/create")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn test_unknown_room_info() {
    let (router, _) = build(Config::default());
    let response = router.oneshot(get("/api/rooms/nowhere")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn test_room_info_reports_live_room() {
    let (router, server) = build(Config::default());

    let (handle, mut outbound) = connection::channel(16);
    let (sender, stream) = memory::pair();
    let task = tokio::spawn({
        let server = Arc::clone(&server);
        let handle = handle.clone();
        async move { server.serve_connection("standup", handle, stream).await }
    });

    assert!(sender.send_text(r#"{"type":"join","data":{"user_id":"alice","role":"host"}}"#));
    let ack = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack.kind(), MessageKind::Join);

    let response = router.oneshot(get("/api/rooms/standup")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["room"]["slug"], "standup");
    assert_eq!(json["room"]["has_host"], true);
    assert_eq!(json["room"]["guests_count"], 0);
    assert_eq!(json["room"]["participants"]["host"]["id"], "alice");

    drop(sender);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.room_count(), 0);
}

#[tokio::test]
async fn test_websocket_without_room_id() {
    let (router, _) = build(Config::default());
    for uri in ["/ws", "/ws/"] {
        let response = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let json = body_json(response).await;
        assert_eq!(json["error"], "Missing room ID");
    }
}

#[tokio::test]
async fn test_websocket_requires_upgrade() {
    let (router, _) = build(Config::default());
    let response = router.oneshot(get("/ws/standup")).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let mut config = Config::default();
    config.rate_limit.create_room = RouteQuota::new(1, 1);
    let (router, _) = build(config);

    let create = || {
        Request::builder()
            .method("POST")
            .uri("/api/rooms/create")
            .body(Body::empty())
            .unwrap()
    };

    let first = router.clone().oneshot(create()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router.clone().oneshot(create()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));

    // Other routes keep their own budget
    let info = router.oneshot(get("/api/rooms/standup")).await.unwrap();
    assert_eq!(info.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_disabled() {
    let mut config = Config::default();
    config.rate_limit.enabled = false;
    config.rate_limit.room_info = RouteQuota::new(1, 1);
    let (router, _) = build(config);

    for _ in 0..5 {
        let response = router.clone().oneshot(get("/api/rooms/standup")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
