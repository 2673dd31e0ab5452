//! Chat-completion streaming proxy
//!
//! - `provider` - closed set of upstream providers (endpoint, auth, decoding)
//! - `sse` - incremental SSE framing
//! - `stream` - `StreamProxy`, the upstream-to-sink pump

mod provider;
mod sse;
mod stream;

pub use provider::{Decoded, DecodeState, Provider};
pub use sse::{SseDecoder, TruncatedFrame};
pub use stream::{status_message, ProxyConfig, StreamOutcome, StreamProxy, StreamSummary};
