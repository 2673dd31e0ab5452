//! Session registry lifecycle through the public bridge API

use std::sync::Arc;
use std::time::Duration;

use llmgate_gateway::{BridgeError, NoopTokenExchange, PublishRequest, SubscribeRequest};
use pretty_assertions::assert_eq;
use tests::{id_headers, live_server, tool_call, tool_text, wait_until, MockTokenExchange, RecordingSender};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_subscribe_registers_until_cancelled() {
    let server = live_server(Arc::new(NoopTokenExchange));
    let cancel = CancellationToken::new();

    let task = {
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            server
                .run_stream(
                    SubscribeRequest::new("mcp/abc/subscribe"),
                    Arc::new(RecordingSender::new()),
                    cancel,
                )
                .await
        })
    };

    assert!(wait_until(Duration::from_secs(1), || server.has_session("mcp/abc")).await);
    assert_eq!(server.session_count(), 1);

    cancel.cancel();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(BridgeError::Cancelled(p)) if p == "mcp/abc"));
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_duplicate_subscribe_is_rejected() {
    let server = live_server(Arc::new(NoopTokenExchange));

    let first = server
        .open_session(
            &SubscribeRequest::new("mcp/abc/subscribe"),
            Arc::new(RecordingSender::new()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let err = server
        .open_session(
            &SubscribeRequest::new("mcp/abc/subscribe"),
            Arc::new(RecordingSender::new()),
            &CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BridgeError::StreamAlreadyActive(p) if p == "mcp/abc"));

    // The original session is untouched
    assert_eq!(server.session_count(), 1);
    assert_eq!(server.registry().get("mcp/abc").unwrap().id(), first.session_id());
}

#[tokio::test]
async fn test_initial_exchange_failure_registers_nothing() {
    let exchange = Arc::new(MockTokenExchange::new().failing_from(1));
    let server = live_server(exchange.clone());

    let err = server
        .open_session(
            &SubscribeRequest::new("mcp/abc/subscribe"),
            Arc::new(RecordingSender::new()),
            &CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();

    assert!(matches!(err, BridgeError::InitialExchange { ref path, .. } if path == "mcp/abc"));
    assert_eq!(exchange.calls(), 1);
    assert_eq!(server.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_initial_exchange_registers_nothing() {
    let exchange = Arc::new(MockTokenExchange::new().with_delay(Duration::from_secs(9)));
    let server = live_server(exchange.clone());
    let cancel = CancellationToken::new();

    let task = {
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            server
                .run_stream(
                    SubscribeRequest::new("mcp/x/subscribe"),
                    Arc::new(RecordingSender::new()),
                    cancel,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(exchange.calls(), 1);

    let cancelled_at = tokio::time::Instant::now();
    cancel.cancel();
    let result = task.await.unwrap();

    assert!(matches!(result, Err(BridgeError::Cancelled(p)) if p == "mcp/x"));
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let exchange = Arc::new(MockTokenExchange::new());
    let server = live_server(exchange.clone());

    let sender_a = Arc::new(RecordingSender::new());
    let sender_b = Arc::new(RecordingSender::new());
    let _a = server
        .open_session(
            &SubscribeRequest::new("mcp/a/subscribe"),
            sender_a.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let _b = server
        .open_session(
            &SubscribeRequest::new("mcp/b/subscribe"),
            sender_b.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let (ra, rb) = tokio::join!(
        server.publish(
            PublishRequest::new("mcp/a/publish", id_headers(), tool_call(1, "echo_token")),
            CancellationToken::new(),
        ),
        server.publish(
            PublishRequest::new("mcp/b/publish", id_headers(), tool_call(2, "echo_token")),
            CancellationToken::new(),
        ),
    );
    ra.unwrap();
    rb.unwrap();

    let a = sender_a.messages();
    let b = sender_b.messages();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);

    // Each session answered with its own token
    assert_eq!(tool_text(&a[0]), "token-1");
    assert_eq!(tool_text(&b[0]), "token-2");
}

#[tokio::test]
async fn test_shutdown_ends_every_session() {
    let server = live_server(Arc::new(MockTokenExchange::new()));

    let mut tasks = Vec::new();
    for name in ["one", "two", "three"] {
        let server = server.clone();
        tasks.push(tokio::spawn(async move {
            server
                .run_stream(
                    SubscribeRequest::new(format!("mcp/{}/subscribe", name)),
                    Arc::new(RecordingSender::new()),
                    CancellationToken::new(),
                )
                .await
        }));
    }

    assert!(wait_until(Duration::from_secs(1), || server.session_count() == 3).await);

    server.close();
    server.close();

    for task in tasks {
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session did not observe shutdown")
            .unwrap();
        assert!(result.is_ok());
    }
    assert_eq!(server.session_count(), 0);

    let err = server
        .publish(
            PublishRequest::new("mcp/one/publish", id_headers(), tool_call(1, "echo_token")),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Closed));
}

#[tokio::test]
async fn test_path_can_be_reused_after_close() {
    let server = live_server(Arc::new(NoopTokenExchange));

    let first = server
        .open_session(
            &SubscribeRequest::new("mcp/abc/subscribe"),
            Arc::new(RecordingSender::new()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    drop(first);

    let second = server
        .open_session(
            &SubscribeRequest::new("mcp/abc/subscribe"),
            Arc::new(RecordingSender::new()),
            &CancellationToken::new(),
        )
        .await;
    assert!(second.is_ok());
}
