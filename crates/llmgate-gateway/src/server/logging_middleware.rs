//! HTTP Request/Response Logging Middleware
//!
//! One entry and one exit line per request, correlated by trace ID.
//! Credential headers are never printed. Streaming responses (SSE) are
//! passed through untouched; only `/mcp` responses are buffered for a summary.

use axum::{body::Body, extract::Request, http::StatusCode, middleware::Next, response::Response};
use http_body_util::BodyExt;
use tracing::{debug, warn, Instrument};

use crate::logging::{RequestSpan, TraceContext};

/// Maximum body size to log (1MB)
const MAX_BODY_LOG_SIZE: usize = 1024 * 1024;

/// Paths whose bodies carry user content (prompts)
const SENSITIVE_PATHS: &[&str] = &["/api/llm/"];

/// Headers that must be redacted
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-access-token",
    "x-grafana-id",
    "api-key",
    "x-api-key",
    "cookie",
];

/// Headers worth printing at DEBUG
const LOGGED_HEADERS: &[&str] = &[
    "content-type",
    "accept",
    "user-agent",
    "authorization",
    "x-access-token",
    "x-grafana-id",
];

pub fn is_sensitive_path(path: &str) -> bool {
    SENSITIVE_PATHS.iter().any(|p| path.contains(p))
}

fn carries_rpc(path: &str) -> bool {
    path == "/mcp" || (path.starts_with("/api/live/") && path.ends_with("/publish"))
}

/// Compact header dump with credentials replaced by `[REDACTED]`
pub fn redact_headers_compact(headers: &axum::http::HeaderMap) -> String {
    headers
        .iter()
        .filter(|(name, _)| LOGGED_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| {
            if SENSITIVE_HEADERS.contains(&name.as_str()) {
                format!("{}=[REDACTED]", name)
            } else {
                format!("{}={:?}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format bytes as string - compact version
pub fn format_body(bytes: &[u8], redact: bool) -> String {
    if redact {
        return "[REDACTED]".to_string();
    }

    if bytes.is_empty() {
        return "[empty]".to_string();
    }

    if bytes.len() > MAX_BODY_LOG_SIZE {
        return format!("[{} bytes]", bytes.len());
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => {
            // For JSON-RPC only the method is interesting
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
                if let Some(method) = json.get("method").and_then(|m| m.as_str()) {
                    return method.to_string();
                }
                return serde_json::to_string(&json).unwrap_or_else(|_| text.to_string());
            }
            if text.chars().count() > 200 {
                format!("{}...", text.chars().take(200).collect::<String>())
            } else {
                text.to_string()
            }
        }
        Err(_) => format!("[binary: {} bytes]", bytes.len()),
    }
}

/// Summarize a JSON-RPC response body
fn format_rpc_response(bytes: &[u8]) -> Option<String> {
    let json: serde_json::Value = serde_json::from_slice(bytes).ok()?;

    if let Some(error) = json.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown");
        return Some(format!("error: {} ({})", message, code));
    }

    let result = json.get("result")?;
    if let Some(tools) = result.get("tools").and_then(|t| t.as_array()) {
        return Some(format!("tools: {}", tools.len()));
    }
    if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
        let failed = result
            .get("isError")
            .and_then(|e| e.as_bool())
            .unwrap_or(false);
        return Some(format!(
            "content: {} items{}",
            content.len(),
            if failed { " (tool error)" } else { "" }
        ));
    }
    if let Some(version) = result.get("protocolVersion").and_then(|v| v.as_str()) {
        return Some(format!("initialized ({})", version));
    }
    Some("ok".to_string())
}

/// Logging middleware for requests and responses
pub async fn http_logging_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();
    let redact = is_sensitive_path(&path);

    let (parts, body) = request.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(path = %path, "Failed to read request body: {}", e);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let rpc_method = if carries_rpc(&path) {
        TraceContext::rpc_method_of(&body_bytes)
    } else {
        None
    };
    let ctx = TraceContext::new(&method, &path).with_rpc_method(rpc_method);
    let span = RequestSpan::enter(&ctx);

    async move {
        RequestSpan::log_entry(&ctx);
        debug!(
            trace_id = %ctx.trace_id,
            headers = %redact_headers_compact(&headers),
            "Request headers"
        );
        if !body_bytes.is_empty() {
            debug!(
                trace_id = %ctx.trace_id,
                body = %format_body(&body_bytes, redact),
                "Request body"
            );
        }

        let mut request = Request::from_parts(parts, Body::from(body_bytes));
        request.extensions_mut().insert(ctx.clone());

        let response = next.run(request).await;
        let status = response.status().as_u16();

        if path != "/mcp" {
            RequestSpan::log_exit(&ctx, status, None);
            return Ok(response);
        }

        let (parts, body) = response.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, "Failed to read response body: {}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let summary = format_rpc_response(&body_bytes);
        RequestSpan::log_exit(&ctx, status, summary.as_deref());

        Ok(Response::from_parts(parts, Body::from(body_bytes)))
    }
    .instrument(span)
    .await
}
