//! llmgate Gateway
//!
//! Real-time transport and streaming-proxy layer:
//! - Credential exchange for short-lived, tenant-scoped access tokens
//! - Live bridge carrying the MCP engine over publish/subscribe sessions,
//!   with per-session background token refresh
//! - Stateless MCP over plain HTTP sharing the same context derivation
//! - Chat-completion streaming proxy with in-band error events
//! - HTTP surface (axum) and request logging

pub mod auth;
pub mod error;
pub mod live;
pub mod logging;
pub mod mcp;
pub mod proxy;
pub mod server;

pub use auth::{
    exchange_client_from_settings, new_exchange_client, AccessToken, HttpTokenExchange,
    NoopTokenExchange, TokenExchange, REFRESH_INTERVAL, TOKEN_TIMEOUT,
};
pub use error::{BridgeError, ExchangeError, SendError};
pub use live::{
    derive_logical_path, ChannelSender, LiveConfig, LiveServer, PublishRequest, SessionHandle,
    SessionState, StreamSender, SubscribeRequest,
};
pub use mcp::{
    CallContext, ContextChain, Credentials, GatewayHandler, McpEngine, ProtocolEngine, ToolHandler,
    ToolRegistry,
};
pub use proxy::{Provider, ProxyConfig, StreamOutcome, StreamProxy, StreamSummary};
pub use server::{AppState, GatewayConfig, GatewayServer};
