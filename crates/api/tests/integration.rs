//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! Requires a running Redis instance.
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" \
//!   cargo test -p courier-api --test integration -- --ignored --nocapture
//! ```

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use courier_api::routes::create_router;
use courier_api::state::AppState;
use courier_common::config::AppConfig;
use courier_hub::Hub;
use courier_queue::StreamBroker;

/// Create a test AppConfig that never touches a real email provider.
fn test_config() -> AppConfig {
    AppConfig {
        redis_url: std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        http_port: 8080,
        worker_max_retries: 3,
        worker_retry_delay_secs: 1,
        shutdown_grace_secs: 5,
        email_api_url: "http://unused".to_string(),
        email_api_key: None,
        email_from: "no-reply@courier.test".to_string(),
    }
}

/// Build an AppState against the live Redis named by REDIS_URL.
async fn build_test_state() -> AppState {
    let config = test_config();
    let broker = StreamBroker::connect(&config.redis_url).await.unwrap();
    let (hub, runner) = Hub::new();
    tokio::spawn(runner.run());
    AppState::new(broker, hub, config)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn test_health_endpoint() {
    let state = build_test_state().await;
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "courier");
}

#[tokio::test]
#[ignore]
async fn test_send_notification_accepted() {
    let state = build_test_state().await;
    let app = create_router(state);

    let response = app
        .oneshot(post_json(
            "/notifications/send",
            serde_json::json!({
                "recipient_id": "user-1",
                "recipient": "ada@example.com",
                "subject": "Welcome",
                "template_name": "welcome_email",
                "template_data": {"name": "Ada"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["message"], "notification accepted for processing");
}

#[tokio::test]
#[ignore]
async fn test_send_notification_rejects_invalid_email() {
    let state = build_test_state().await;
    let app = create_router(state);

    let response = app
        .oneshot(post_json(
            "/notifications/send",
            serde_json::json!({
                "recipient_id": "user-1",
                "recipient": "not-an-email",
                "subject": "Welcome",
                "template_name": "welcome_email"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("valid email address")
    );
}

#[tokio::test]
#[ignore]
async fn test_send_notification_rejects_missing_template() {
    let state = build_test_state().await;
    let app = create_router(state);

    let response = app
        .oneshot(post_json(
            "/notifications/send",
            serde_json::json!({
                "recipient_id": "user-1",
                "recipient": "ada@example.com",
                "subject": "Welcome",
                "template_name": ""
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
