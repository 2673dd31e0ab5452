//! HTTP surface tests driven through the router

mod live_routes;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use llmgate_core::ProviderSettings;
use llmgate_gateway::{
    AppState, GatewayConfig, GatewayServer, LiveConfig, ProxyConfig, StreamProxy, TokenExchange,
};
use serde_json::Value;
use tests::{test_contexts, test_engine};

/// Gateway over the test engine
pub fn gateway(exchange: Arc<dyn TokenExchange>, provider: &ProviderSettings) -> GatewayServer {
    let state = AppState::new(
        exchange,
        test_engine(),
        test_contexts(),
        StreamProxy::with_client(reqwest::Client::new(), provider, ProxyConfig::default()),
        LiveConfig::default(),
    );
    GatewayServer::new(GatewayConfig::default(), state)
}

pub fn router(server: &GatewayServer) -> Router {
    server.router()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn text_body(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Read SSE frames from a streaming body until `needle` shows up
pub async fn read_until(body: &mut Body, needle: &str, timeout: Duration) -> String {
    let mut seen = String::new();
    let read = async {
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame.unwrap().into_data() {
                seen.push_str(&String::from_utf8_lossy(&data));
                if seen.contains(needle) {
                    return;
                }
            }
        }
    };
    let _ = tokio::time::timeout(timeout, read).await;
    seen
}
