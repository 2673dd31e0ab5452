//! Token exchange over HTTP

use std::sync::Arc;

use llmgate_core::Secret;
use llmgate_gateway::{
    new_exchange_client, ExchangeError, HttpTokenExchange, PublishRequest, SubscribeRequest, TokenExchange,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{id_headers, live_server, tool_call, tool_text, RecordingSender};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn exchange_server(response: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sign-access-token"))
        .respond_with(response)
        .mount(&server)
        .await;
    server
}

fn client(server: &MockServer) -> HttpTokenExchange {
    HttpTokenExchange::new(&server.uri(), Secret::new("glc_policy"), "42").unwrap()
}

#[tokio::test]
async fn test_exchange_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sign-access-token"))
        .and(header("authorization", "Bearer glc_policy"))
        .and(body_json(json!({
            "namespace": "stack-42",
            "audiences": ["grafana"],
            "expiresIn": 300,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "minted"}})))
        .expect(1)
        .mount(&server)
        .await;

    let token = client(&server).access_token().await.unwrap();
    assert_eq!(token.as_str(), "minted");
    assert!(!token.is_expired());
}

#[tokio::test]
async fn test_exchange_rejection_carries_status() {
    let server = exchange_server(ResponseTemplate::new(403).set_body_string("policy revoked")).await;

    let err = client(&server).access_token().await.unwrap_err();
    match err {
        ExchangeError::Status { status, body } => {
            assert_eq!(status, 403);
            assert_eq!(body, "policy revoked");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_exchange_empty_token_is_an_error() {
    let server =
        exchange_server(ResponseTemplate::new(200).set_body_json(json!({"data": {"token": ""}}))).await;

    let err = client(&server).access_token().await.unwrap_err();
    assert!(matches!(err, ExchangeError::EmptyToken));
}

#[tokio::test]
async fn test_exchange_malformed_body_is_an_error() {
    let server = exchange_server(ResponseTemplate::new(200).set_body_string("<html>")).await;

    let err = client(&server).access_token().await.unwrap_err();
    assert!(matches!(err, ExchangeError::Decode(_)));
}

#[tokio::test]
async fn test_every_call_mints_a_new_token() {
    let server = exchange_server(
        ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "minted"}})),
    )
    .await;

    let client = client(&server);
    client.access_token().await.unwrap();
    client.access_token().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_live_session_uses_exchanged_token() {
    let upstream = exchange_server(
        ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "exchanged-at"}})),
    )
    .await;

    let exchange = new_exchange_client(&Secret::new("glc_policy"), "42", true, &upstream.uri()).unwrap();
    assert!(exchange.is_enabled());

    let live = live_server(exchange);
    let sender = Arc::new(RecordingSender::new());
    let _handle = live
        .open_session(
            &SubscribeRequest::new("mcp/abc/subscribe"),
            sender.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    live.publish(
        PublishRequest::new("mcp/abc/publish", id_headers(), tool_call(1, "echo_token")),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(tool_text(&sender.messages()[0]), "exchanged-at");
}
