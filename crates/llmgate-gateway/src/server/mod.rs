//! Gateway Server
//!
//! HTTP surface over the live bridge, the stateless MCP transport and the
//! chat-completion streaming proxy.

mod handlers;
pub mod logging_middleware;
mod state;

pub use handlers::HealthResponse;
pub use state::AppState;

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use llmgate_core::Settings;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::live::{LiveConfig, LiveServer};
use crate::proxy::ProxyConfig;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8085;

/// Gateway server configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Enable CORS for browser access
    pub enable_cors: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            enable_cors: true,
        }
    }
}

impl GatewayConfig {
    /// Read `LLMGATE_HOST`, `LLMGATE_PORT` and `LLMGATE_CORS` on top of the defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("LLMGATE_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("LLMGATE_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("invalid LLMGATE_PORT '{}'", port))?;
        }
        if let Ok(cors) = std::env::var("LLMGATE_CORS") {
            config.enable_cors = !matches!(cors.as_str(), "0" | "false" | "no");
        }
        Ok(config)
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Gateway server. Owns the handler state and the HTTP lifecycle.
pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Production wiring from validated settings
    pub fn from_settings(config: GatewayConfig, settings: &Settings) -> anyhow::Result<Self> {
        info!("[Gateway] Initializing...");
        let state = AppState::from_settings(settings, LiveConfig::default(), ProxyConfig::default())?;
        Ok(Self::new(config, state))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn live(&self) -> &LiveServer {
        &self.state.live
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(handlers::health))
            .route(
                "/api/live/{*channel}",
                get(handlers::live_subscribe).post(handlers::live_publish),
            )
            .route("/mcp", post(handlers::mcp_http))
            .route("/api/llm/chat/completions", post(handlers::chat_completions))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(
                logging_middleware::http_logging_middleware,
            ));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Run until the process is stopped
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(CancellationToken::new()).await
    }

    /// Run until `shutdown` fires. The live bridge is closed first so that
    /// subscriber streams end and the server can drain.
    pub async fn run_until(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = self.config.addr()?;
        info!("[Gateway] Starting on {}", addr);
        info!(
            "[Gateway] CORS: {}",
            if self.config.enable_cors {
                "enabled"
            } else {
                "disabled"
            }
        );

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!("[Gateway] Ready to accept connections");

        let live = self.state.live.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                live.close();
            })
            .await?;

        info!("[Gateway] Stopped");
        Ok(())
    }

    /// Start the server in the background
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run_until(shutdown).await })
    }
}
