//! Provider-agnostic chat-completion payloads
//!
//! Requests use the OpenAI chat shape; unknown request fields are carried through
//! to the provider untouched. Downstream events are either the provider's own
//! chunk JSON or an [`ErrorEvent`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A chat message in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// One outbound chat-completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    /// Remaining OpenAI options (temperature, max_tokens, tools, ...)
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            options: Map::new(),
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Structured in-band error: `{"error": "<message>"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    /// Serialized downstream frame
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(json!({ "error": self.error }).to_string())
    }

    /// Recognise an error frame produced by [`ErrorEvent::to_bytes`]
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(frame).ok()?;
        let message = value.get("error")?.as_str()?;
        Some(Self::new(message))
    }
}

/// Helpers over OpenAI-shaped streaming chunks
pub struct ChatCompletionChunk;

impl ChatCompletionChunk {
    /// Build an OpenAI-shaped chunk carrying one content delta
    pub fn content_delta(id: &str, model: &str, content: &str) -> Value {
        json!({
            "id": id,
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{
                "index": 0,
                "delta": {"role": "assistant", "content": content},
                "finish_reason": null
            }]
        })
    }

    /// Build an OpenAI-shaped chunk that carries only a finish reason
    pub fn finish(id: &str, model: &str, reason: &str) -> Value {
        json!({
            "id": id,
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
        })
    }

    /// Content delta of the first choice, if any
    pub fn delta_content(chunk: &Value) -> Option<&str> {
        chunk
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
    }
}
