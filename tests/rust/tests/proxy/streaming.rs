//! Chunk forwarding and in-band error events

use std::sync::Arc;

use llmgate_core::{ChatCompletionChunk, ErrorEvent, ProviderKind, ProviderSettings};
use llmgate_gateway::{ChannelSender, StreamOutcome};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::RecordingSender;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{drain, proxy, request, settings, sse};

const HELLO: &str = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
const WORLD: &str = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"lo"}}]}"#;

async fn openai(response: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(response)
        .mount(&server)
        .await;
    server
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

#[tokio::test]
async fn test_chunks_are_forwarded_in_order() {
    let server = openai(event_stream(sse(&[HELLO, WORLD, "[DONE]"]))).await;
    let proxy = proxy(&settings(ProviderKind::OpenAi, &server));

    let (sink, rx) = ChannelSender::pair(16);
    let summary = proxy.stream_chat(request("gpt-4o"), &sink).await;
    drop(sink);

    assert_eq!(summary.outcome, StreamOutcome::Completed);
    assert_eq!(summary.forwarded, 2);

    let frames = drain(rx).await;
    let contents: Vec<&str> = frames
        .iter()
        .filter_map(ChatCompletionChunk::delta_content)
        .collect();
    assert_eq!(contents, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn test_upstream_401_becomes_error_event() {
    let server = openai(
        ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
    )
    .await;
    let proxy = proxy(&settings(ProviderKind::OpenAi, &server));

    let (sink, rx) = ChannelSender::pair(16);
    let summary = proxy.stream_chat(request("gpt-4o"), &sink).await;
    drop(sink);

    let frames = drain(rx).await;
    assert_eq!(frames, vec![json!({"error": "401 Unauthorized bad key"})]);
    assert!(matches!(summary.outcome, StreamOutcome::Failed(_)));
    assert_eq!(summary.forwarded, 0);
}

#[tokio::test]
async fn test_non_200_success_status_is_still_an_error() {
    let server = openai(ResponseTemplate::new(206).set_body_string(sse(&[HELLO]))).await;
    let proxy = proxy(&settings(ProviderKind::OpenAi, &server));

    let (sink, rx) = ChannelSender::pair(16);
    let summary = proxy.stream_chat(request("gpt-4o"), &sink).await;
    drop(sink);

    let frames = drain(rx).await;
    assert_eq!(frames.len(), 1);
    let error = frames[0]["error"].as_str().unwrap();
    assert!(error.starts_with("206"), "got {error}");
    assert!(!summary.is_completed());
}

#[tokio::test]
async fn test_error_event_mid_stream_ends_forwarding() {
    let body = sse(&[
        HELLO,
        r#"{"error":{"message":"overloaded"}}"#,
        WORLD,
        "[DONE]",
    ]);
    let server = openai(event_stream(body)).await;
    let proxy = proxy(&settings(ProviderKind::OpenAi, &server));

    let (sink, rx) = ChannelSender::pair(16);
    let summary = proxy.stream_chat(request("gpt-4o"), &sink).await;
    drop(sink);

    let frames = drain(rx).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(ChatCompletionChunk::delta_content(&frames[0]), Some("Hel"));
    assert_eq!(frames[1], json!({"error": "overloaded"}));
    assert_eq!(summary.outcome, StreamOutcome::Failed("overloaded".to_string()));
}

#[tokio::test]
async fn test_truncated_stream_ends_with_error() {
    let body = format!("{}data: {{\"choices\":[{{\"del", sse(&[HELLO]));
    let server = openai(event_stream(body)).await;
    let proxy = proxy(&settings(ProviderKind::OpenAi, &server));

    let (sink, rx) = ChannelSender::pair(16);
    let summary = proxy.stream_chat(request("gpt-4o"), &sink).await;
    drop(sink);

    let frames = drain(rx).await;
    assert_eq!(frames.len(), 2);
    assert!(ErrorEvent::parse(frames[1].to_string().as_bytes()).is_some());
    assert!(matches!(summary.outcome, StreamOutcome::Failed(_)));
}

#[tokio::test]
async fn test_stream_without_done_marker_completes() {
    let server = openai(event_stream(sse(&[HELLO, WORLD]))).await;
    let proxy = proxy(&settings(ProviderKind::OpenAi, &server));

    let (sink, rx) = ChannelSender::pair(16);
    let summary = proxy.stream_chat(request("gpt-4o"), &sink).await;
    drop(sink);

    assert_eq!(drain(rx).await.len(), 2);
    assert!(summary.is_completed());
}

#[tokio::test]
async fn test_unreachable_upstream_becomes_error_event() {
    let settings = ProviderSettings {
        url: Some("http://127.0.0.1:1".to_string()),
        ..Default::default()
    };
    let proxy = proxy(&settings);

    let (sink, rx) = ChannelSender::pair(16);
    let summary = proxy.stream_chat(request("gpt-4o"), &sink).await;
    drop(sink);

    let frames = drain(rx).await;
    assert_eq!(frames.len(), 1);
    assert!(frames[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("upstream request failed"));
    assert!(!summary.is_completed());
}

#[tokio::test]
async fn test_closed_sink_stops_the_stream() {
    let server = openai(event_stream(sse(&[HELLO, WORLD, "[DONE]"]))).await;
    let proxy = proxy(&settings(ProviderKind::OpenAi, &server));

    let sink = Arc::new(RecordingSender::new());
    sink.close();
    let summary = proxy.stream_chat(request("gpt-4o"), sink.as_ref()).await;

    assert_eq!(summary.outcome, StreamOutcome::SinkClosed);
    assert_eq!(summary.forwarded, 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_non_streaming_completion_passes_through() {
    let server = openai(
        ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "slow down"}})),
    )
    .await;
    let proxy = proxy(&settings(ProviderKind::OpenAi, &server));

    let mut request = request("gpt-4o");
    request.stream = false;
    let (status, body) = proxy.complete(request).await.unwrap();

    assert_eq!(status.as_u16(), 429);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["message"], json!("slow down"));
}
