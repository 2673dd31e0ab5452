//! Upstream provider variants
//!
//! Selected once from `ProviderSettings`. Each variant knows its endpoint,
//! its auth headers and how to turn one upstream SSE payload into a
//! downstream frame. OpenAI-style chunks pass through untouched; Anthropic
//! events are transcoded into the OpenAI chunk shape.

use bytes::Bytes;
use llmgate_core::{ChatCompletionChunk, ChatCompletionRequest, ProviderKind, ProviderSettings, Secret};
use serde_json::{json, Map, Value};

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_DEFAULT_MAX_TOKENS: u64 = 1024;

/// One decoded upstream event
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Forward this frame downstream
    Chunk(Bytes),
    /// Terminal marker
    Done,
    /// Nothing to forward (keep-alives, bookkeeping events)
    Skip,
    /// In-band upstream failure
    Error(String),
}

/// Per-stream bookkeeping needed by transcoding providers
#[derive(Debug, Default)]
pub struct DecodeState {
    id: String,
    model: String,
}

#[derive(Clone)]
pub enum Provider {
    /// OpenAI and OpenAI-compatible ("custom") endpoints
    OpenAi {
        base_url: String,
        api_key: Secret,
        organization_id: Option<String>,
    },
    Azure {
        base_url: String,
        api_key: Secret,
        api_version: String,
    },
    Anthropic {
        base_url: String,
        api_key: Secret,
    },
}

impl Provider {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let base_url = settings.base_url();
        let api_key = settings.api_key.clone();

        match settings.kind {
            ProviderKind::OpenAi => Provider::OpenAi {
                base_url,
                api_key,
                organization_id: settings.organization_id.clone(),
            },
            ProviderKind::Custom => Provider::OpenAi {
                base_url,
                api_key,
                organization_id: None,
            },
            ProviderKind::Azure => Provider::Azure {
                base_url,
                api_key,
                api_version: settings
                    .api_version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            },
            ProviderKind::Anthropic => Provider::Anthropic { base_url, api_key },
        }
    }

    /// Upstream endpoint for a chat completion with the (resolved) model
    pub fn endpoint(&self, model: &str) -> String {
        match self {
            Provider::OpenAi { base_url, .. } => format!("{}/v1/chat/completions", base_url),
            Provider::Azure {
                base_url,
                api_version,
                ..
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base_url, model, api_version
            ),
            Provider::Anthropic { base_url, .. } => format!("{}/v1/messages", base_url),
        }
    }

    /// Request body in the provider's own shape
    pub fn body(&self, request: &ChatCompletionRequest) -> Value {
        match self {
            Provider::OpenAi { .. } | Provider::Azure { .. } => {
                serde_json::to_value(request).unwrap_or(Value::Null)
            }
            Provider::Anthropic { .. } => anthropic_body(request),
        }
    }

    pub fn build_request(
        &self,
        http: &reqwest::Client,
        request: &ChatCompletionRequest,
    ) -> reqwest::RequestBuilder {
        let builder = http
            .post(self.endpoint(&request.model))
            .json(&self.body(request));

        match self {
            Provider::OpenAi {
                api_key,
                organization_id,
                ..
            } => {
                let builder = if api_key.is_empty() {
                    builder
                } else {
                    builder.bearer_auth(api_key.expose())
                };
                match organization_id {
                    Some(org) => builder.header("OpenAI-Organization", org),
                    None => builder,
                }
            }
            Provider::Azure { api_key, .. } => builder.header("api-key", api_key.expose()),
            Provider::Anthropic { api_key, .. } => builder
                .header("x-api-key", api_key.expose())
                .header("anthropic-version", ANTHROPIC_VERSION),
        }
    }

    /// Decode one SSE payload
    pub fn decode(&self, data: &str, state: &mut DecodeState) -> Decoded {
        match self {
            Provider::OpenAi { .. } | Provider::Azure { .. } => decode_openai(data),
            Provider::Anthropic { .. } => decode_anthropic(data, state),
        }
    }
}

/// Message of an upstream error object (`{"error": {"message": ..}}` or `{"error": ".."}`)
pub fn upstream_error_message(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Object(error) => Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| Value::Object(error.clone()).to_string()),
        ),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn decode_openai(data: &str) -> Decoded {
    if data.trim() == "[DONE]" {
        return Decoded::Done;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => return Decoded::Error(format!("invalid upstream event: {}", e)),
    };

    match upstream_error_message(&value) {
        Some(message) => Decoded::Error(message),
        None => Decoded::Chunk(Bytes::from(data.to_string())),
    }
}

fn decode_anthropic(data: &str, state: &mut DecodeState) -> Decoded {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => return Decoded::Error(format!("invalid upstream event: {}", e)),
    };

    match value.get("type").and_then(Value::as_str).unwrap_or_default() {
        "message_start" => {
            let message = &value["message"];
            state.id = message["id"].as_str().unwrap_or_default().to_string();
            state.model = message["model"].as_str().unwrap_or_default().to_string();
            Decoded::Skip
        }
        "content_block_delta" => match value["delta"]["text"].as_str() {
            Some(text) => chunk(ChatCompletionChunk::content_delta(&state.id, &state.model, text)),
            None => Decoded::Skip,
        },
        "message_delta" => match value["delta"]["stop_reason"].as_str() {
            Some(reason) => {
                let reason = match reason {
                    "end_turn" | "stop_sequence" => "stop",
                    "max_tokens" => "length",
                    "tool_use" => "tool_calls",
                    other => other,
                };
                chunk(ChatCompletionChunk::finish(&state.id, &state.model, reason))
            }
            None => Decoded::Skip,
        },
        "message_stop" => Decoded::Done,
        "error" => Decoded::Error(
            upstream_error_message(&value).unwrap_or_else(|| "upstream error".to_string()),
        ),
        _ => Decoded::Skip,
    }
}

fn chunk(value: Value) -> Decoded {
    Decoded::Chunk(Bytes::from(value.to_string()))
}

fn anthropic_body(request: &ChatCompletionRequest) -> Value {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect();
    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    let mut body = Map::new();
    body.insert("model".to_string(), json!(request.model));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert(
        "max_tokens".to_string(),
        request
            .options
            .get("max_tokens")
            .cloned()
            .unwrap_or_else(|| json!(ANTHROPIC_DEFAULT_MAX_TOKENS)),
    );
    body.insert("stream".to_string(), json!(request.stream));
    if !system.is_empty() {
        body.insert("system".to_string(), json!(system.join("\n\n")));
    }
    for key in ["temperature", "top_p", "stop_sequences"] {
        if let Some(value) = request.options.get(key) {
            body.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(body)
}
