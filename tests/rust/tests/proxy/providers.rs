//! Provider-specific request shaping and event transcoding

use llmgate_core::{ChatCompletionChunk, Model, ProviderKind};
use llmgate_gateway::{ChannelSender, StreamOutcome};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{drain, proxy, request, settings, sse};

const DONE: &str = "[DONE]";
const CHUNK: &str = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"ok"}}]}"#;

#[tokio::test]
async fn test_openai_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("openai-organization", "org-1"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse(&[CHUNK, DONE]), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(ProviderKind::OpenAi, &server);
    settings.organization_id = Some("org-1".to_string());
    let proxy = proxy(&settings);

    // Abstract model names resolve to the provider default
    let mut request = request("base");
    request.stream = false;
    let (sink, rx) = ChannelSender::pair(8);
    let summary = proxy.stream_chat(request, &sink).await;
    drop(sink);

    assert!(summary.is_completed());
    assert_eq!(drain(rx).await.len(), 1);
}

#[tokio::test]
async fn test_model_mapping_overrides_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "my-large-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse(&[DONE]), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(ProviderKind::Custom, &server);
    settings.models.insert(Model::Large, "my-large-model".to_string());
    let proxy = proxy(&settings);

    let (sink, _rx) = ChannelSender::pair(8);
    let summary = proxy.stream_chat(request("large"), &sink).await;
    assert!(summary.is_completed());
    assert_eq!(summary.forwarded, 0);
}

#[tokio::test]
async fn test_azure_deployment_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .and(query_param("api-version", "2024-02-01"))
        .and(header("api-key", "sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse(&[CHUNK, DONE]), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = proxy(&settings(ProviderKind::Azure, &server));
    let (sink, rx) = ChannelSender::pair(8);
    let summary = proxy.stream_chat(request("gpt-4o"), &sink).await;
    drop(sink);

    assert!(summary.is_completed());
    assert_eq!(drain(rx).await.len(), 1);
}

#[tokio::test]
async fn test_anthropic_events_are_transcoded() {
    let events = [
        r#"{"type":"message_start","message":{"id":"msg_1","model":"claude-3-5-haiku-latest"}}"#,
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there"}}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#,
        r#"{"type":"message_stop"}"#,
    ];
    let body: String = events
        .iter()
        .map(|e| {
            let kind = serde_json::from_str::<serde_json::Value>(e).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string();
            format!("event: {}\ndata: {}\n\n", kind, e)
        })
        .collect();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-5-haiku-latest",
            "system": "be brief",
            "max_tokens": 1024,
            "stream": true,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = proxy(&settings(ProviderKind::Anthropic, &server));
    let (sink, rx) = ChannelSender::pair(8);
    let summary = proxy.stream_chat(request("base"), &sink).await;
    drop(sink);

    assert_eq!(summary.outcome, StreamOutcome::Completed);
    let frames = drain(rx).await;
    assert_eq!(frames.len(), 3);

    let text: String = frames
        .iter()
        .filter_map(ChatCompletionChunk::delta_content)
        .collect();
    assert_eq!(text, "Hi there");
    assert_eq!(frames[0]["id"], json!("msg_1"));
    assert_eq!(frames[2]["choices"][0]["finish_reason"], json!("stop"));
}

#[tokio::test]
async fn test_anthropic_error_event() {
    let body = sse(&[r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#]);
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let proxy = proxy(&settings(ProviderKind::Anthropic, &server));
    let (sink, rx) = ChannelSender::pair(8);
    let summary = proxy.stream_chat(request("base"), &sink).await;
    drop(sink);

    assert_eq!(drain(rx).await, vec![json!({"error": "Overloaded"})]);
    assert_eq!(summary.outcome, StreamOutcome::Failed("Overloaded".to_string()));
}
