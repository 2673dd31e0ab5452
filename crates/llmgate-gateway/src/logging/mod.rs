//! Logging helpers
//!
//! Trace IDs correlate one publish, MCP call or proxied completion across the
//! bridge, the engine and upstream calls. Subscriber setup lives in the binary.

mod trace_context;

pub use trace_context::{generate_trace_id, RequestSpan, TraceContext};
