//! `/api/live/*` subscribe and publish routes

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::{header, Request, StatusCode};
use llmgate_core::ProviderSettings;
use llmgate_gateway::NoopTokenExchange;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{rpc_request, wait_until, MockTokenExchange};
use tower::ServiceExt;

use super::{gateway, json_body, read_until, router};

fn subscribe(path: &str) -> Request<Body> {
    Request::get(format!("/api/live/{}/subscribe", path))
        .body(Body::empty())
        .unwrap()
}

fn publish(path: &str, body: Vec<u8>) -> Request<Body> {
    Request::post(format!("/api/live/{}/publish", path))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_subscribe_then_publish_round_trip() {
    let server = gateway(Arc::new(NoopTokenExchange), &ProviderSettings::default());
    let app = router(&server);

    let response = app.clone().oneshot(subscribe("mcp/s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert!(server.live().has_session("mcp/s1"));

    let published = app
        .clone()
        .oneshot(publish("mcp/s1", rpc_request(41, "ping", json!({}))))
        .await
        .unwrap();
    assert_eq!(published.status(), StatusCode::NO_CONTENT);

    let mut body = response.into_body();
    let seen = read_until(&mut body, "\"id\":41", Duration::from_secs(2)).await;
    assert!(seen.starts_with("data: "), "got {seen}");
    assert!(seen.contains("\"result\":{}"), "got {seen}");

    // Dropping the SSE response ends the session
    drop(body);
    let live = server.live().clone();
    assert!(wait_until(Duration::from_secs(2), || live.session_count() == 0).await);
}

#[tokio::test]
async fn test_duplicate_subscribe_is_conflict() {
    let server = gateway(Arc::new(NoopTokenExchange), &ProviderSettings::default());
    let app = router(&server);

    let _first = app.clone().oneshot(subscribe("mcp/s1")).await.unwrap();
    let second = app.clone().oneshot(subscribe("mcp/s1")).await.unwrap();

    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = json_body(second).await;
    assert!(body["error"].as_str().unwrap().contains("mcp/s1"));
}

#[tokio::test]
async fn test_failed_initial_exchange_is_bad_gateway() {
    let exchange = Arc::new(MockTokenExchange::new().failing_from(1));
    let server = gateway(exchange, &ProviderSettings::default());

    let response = router(&server).oneshot(subscribe("mcp/s1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(server.live().session_count(), 0);
}

#[tokio::test]
async fn test_publish_requires_id_token_when_exchanging() {
    let server = gateway(Arc::new(MockTokenExchange::new()), &ProviderSettings::default());
    let app = router(&server);

    let _subscription = app.clone().oneshot(subscribe("mcp/s1")).await.unwrap();
    let response = app
        .oneshot(publish("mcp/s1", rpc_request(1, "ping", json!({}))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("X-Grafana-Id"));
}

#[tokio::test]
async fn test_publish_rejects_wrong_suffix() {
    let server = gateway(Arc::new(NoopTokenExchange), &ProviderSettings::default());

    let response = router(&server)
        .oneshot(
            Request::post("/api/live/mcp/s1/subscribe")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_json_publish_is_bad_request() {
    let server = gateway(Arc::new(NoopTokenExchange), &ProviderSettings::default());
    let app = router(&server);

    let _subscription = app.clone().oneshot(subscribe("mcp/s1")).await.unwrap();
    let response = app
        .oneshot(publish("mcp/s1", b"not json".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_counts_sessions() {
    let server = gateway(Arc::new(NoopTokenExchange), &ProviderSettings::default());
    let app = router(&server);

    let _a = app.clone().oneshot(subscribe("mcp/a")).await.unwrap();
    let _b = app.clone().oneshot(subscribe("mcp/b")).await.unwrap();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["sessions"], json!(2));
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn test_close_ends_subscriber_streams() {
    let server = gateway(Arc::new(NoopTokenExchange), &ProviderSettings::default());
    let app = router(&server);

    let response = app.clone().oneshot(subscribe("mcp/s1")).await.unwrap();
    server.live().close();

    // The stream finishes on its own once the session loop exits
    let collected = tokio::time::timeout(Duration::from_secs(2), super::text_body(response)).await;
    assert!(collected.is_ok());
    assert_eq!(server.live().session_count(), 0);
}
