//! Shared test utilities and fixtures for llmgate integration tests.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderValue};
use llmgate_gateway::mcp::context::CredentialsDecorator;
use llmgate_gateway::{ContextChain, LiveConfig, LiveServer, McpEngine, TokenExchange, ToolRegistry};
use serde_json::{json, Value};

pub use mocks::{EchoTokenTool, MockTokenExchange, RecordingSender, SlowTool};

/// Correlation header value used by publish fixtures
pub const TEST_ID_TOKEN: &str = "id-token-for-tests";

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Built-in tools plus the test tools
pub fn test_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::with_builtin_tools();
    tools.register(EchoTokenTool);
    tools.register(SlowTool::default());
    tools
}

/// Engine over [`test_tools`]
pub fn test_engine() -> Arc<McpEngine> {
    Arc::new(McpEngine::new(test_tools()))
}

/// Decorator chain that only resolves credentials
pub fn test_contexts() -> ContextChain {
    ContextChain::new().with(CredentialsDecorator::new(None))
}

/// Live server over the test engine with the default refresh interval
pub fn live_server(exchange: Arc<dyn TokenExchange>) -> LiveServer {
    live_server_with(exchange, LiveConfig::default())
}

pub fn live_server_with(exchange: Arc<dyn TokenExchange>, config: LiveConfig) -> LiveServer {
    LiveServer::new(exchange, test_engine(), test_contexts(), config)
}

/// Headers carrying the end-user ID token
pub fn id_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-grafana-id", HeaderValue::from_static(TEST_ID_TOKEN));
    headers
}

/// JSON-RPC request bytes
pub fn rpc_request(id: u64, method: &str, params: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }))
    .unwrap()
}

/// `tools/call` request bytes
pub fn tool_call(id: u64, name: &str) -> Vec<u8> {
    rpc_request(id, "tools/call", json!({ "name": name, "arguments": {} }))
}

/// Text of the first content item of a `tools/call` response
pub fn tool_text(response: &[u8]) -> String {
    let value: Value = serde_json::from_slice(response).unwrap();
    value["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
