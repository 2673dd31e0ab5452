//! Trace Context - request correlation and structured logging
//!
//! Generates short trace IDs and the consolidated entry/exit log lines.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{info, info_span, Span};

/// Global request counter for trace ID generation
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a short trace ID. Format: 6 hex characters (e.g. "a1b2c3")
pub fn generate_trace_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    // Spread consecutive counters so IDs from the same microsecond differ visibly
    let mixed = timestamp ^ counter.wrapping_mul(0x9E37_79B9);
    format!("{:06x}", mixed & 0xFF_FFFF)
}

/// Correlation data for one unit of work
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    /// Transport verb (GET, POST, PUBLISH, STREAM)
    pub method: String,
    /// Request path or logical session path
    pub path: String,
    /// JSON-RPC method when the body carries one
    pub rpc_method: Option<String>,
    /// Upstream provider for proxied completions
    pub provider: Option<String>,
    pub started_at: Instant,
}

impl TraceContext {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            method: method.to_string(),
            path: path.to_string(),
            rpc_method: None,
            provider: None,
            started_at: Instant::now(),
        }
    }

    /// Set the JSON-RPC method (parsed from the message body)
    pub fn with_rpc_method(mut self, method: Option<String>) -> Self {
        self.rpc_method = method;
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Peek at a JSON-RPC body for its method name without full decoding
    pub fn rpc_method_of(body: &[u8]) -> Option<String> {
        #[derive(serde::Deserialize)]
        struct Peek {
            method: Option<String>,
        }
        serde_json::from_slice::<Peek>(body).ok()?.method
    }
}

/// Span and log-line helpers
pub struct RequestSpan;

impl RequestSpan {
    /// Span that attaches trace_id to every child log
    pub fn enter(ctx: &TraceContext) -> Span {
        info_span!(
            "request",
            trace_id = %ctx.trace_id,
            method = %ctx.method,
            path = %ctx.path,
        )
    }

    /// Log request entry (single consolidated line)
    pub fn log_entry(ctx: &TraceContext) {
        match (&ctx.rpc_method, &ctx.provider) {
            (Some(rpc), _) => info!(
                trace_id = %ctx.trace_id,
                "→ {} {} {}",
                ctx.method,
                ctx.path,
                rpc
            ),
            (None, Some(provider)) => info!(
                trace_id = %ctx.trace_id,
                "→ {} {} provider={}",
                ctx.method,
                ctx.path,
                provider
            ),
            (None, None) => info!(trace_id = %ctx.trace_id, "→ {} {}", ctx.method, ctx.path),
        }
    }

    /// Log request completion (single consolidated line)
    pub fn log_exit(ctx: &TraceContext, status: u16, detail: Option<&str>) {
        let elapsed = ctx.elapsed_ms();

        match detail {
            Some(d) => info!(
                trace_id = %ctx.trace_id,
                "← {} {} ({}ms)",
                status,
                d,
                elapsed
            ),
            None => info!(trace_id = %ctx.trace_id, "← {} ({}ms)", status, elapsed),
        }
    }
}
