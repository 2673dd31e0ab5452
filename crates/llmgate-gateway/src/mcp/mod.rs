//! MCP protocol engine and request context
//!
//! - `engine` - `ProtocolEngine` seam, the rmcp `GatewayHandler` and the embedded server
//! - `context` - `CallContext` and the decorator chain shared by both transports
//! - `tools` - tool catalog and built-in Grafana tools

pub mod context;
mod engine;
pub mod tools;

pub use context::{
    CallContext, ContextChain, ContextDecorator, Credentials, CredentialsDecorator, GrafanaClient,
    GrafanaClientDecorator, IncidentClient, IncidentClientDecorator, with_access_token,
    ACCESS_TOKEN_HEADER, ID_TOKEN_HEADER,
};
pub use engine::{GatewayHandler, McpEngine, ProtocolEngine};
pub use tools::{ToolHandler, ToolRegistry};
