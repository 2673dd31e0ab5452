//! Shared handler state
//!
//! Built once per server. Every component is explicitly constructed and
//! injected; nothing is global, so tests can run independent instances.

use std::sync::Arc;

use http::HeaderMap;
use llmgate_core::Settings;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{exchange_client_from_settings, TokenExchange};
use crate::error::BridgeError;
use crate::live::{LiveConfig, LiveServer};
use crate::mcp::{with_access_token, CallContext, ContextChain, McpEngine, ProtocolEngine, ID_TOKEN_HEADER};
use crate::proxy::{ProxyConfig, StreamProxy};

const MCP_HTTP_PATH: &str = "/mcp";

#[derive(Clone)]
pub struct AppState {
    pub live: LiveServer,
    pub engine: Arc<dyn ProtocolEngine>,
    pub exchange: Arc<dyn TokenExchange>,
    pub contexts: ContextChain,
    pub proxy: Arc<StreamProxy>,
}

impl AppState {
    /// Wire the components together; the live bridge shares the engine and chain
    pub fn new(
        exchange: Arc<dyn TokenExchange>,
        engine: Arc<dyn ProtocolEngine>,
        contexts: ContextChain,
        proxy: StreamProxy,
        live_config: LiveConfig,
    ) -> Self {
        let live = LiveServer::new(
            Arc::clone(&exchange),
            Arc::clone(&engine),
            contexts.clone(),
            live_config,
        );
        Self {
            live,
            engine,
            exchange,
            contexts,
            proxy: Arc::new(proxy),
        }
    }

    /// Production wiring from validated settings
    pub fn from_settings(
        settings: &Settings,
        live_config: LiveConfig,
        proxy_config: ProxyConfig,
    ) -> anyhow::Result<Self> {
        let exchange = exchange_client_from_settings(settings)?;
        let http = reqwest::Client::new();
        let contexts = ContextChain::from_settings(settings, http);
        let engine: Arc<dyn ProtocolEngine> = Arc::new(McpEngine::with_builtin_tools());
        let proxy = StreamProxy::new(&settings.provider, proxy_config)?;

        info!(
            provider = proxy.provider_name(),
            token_exchange = exchange.is_enabled(),
            decorators = ?contexts.names(),
            "[Gateway] Components initialized"
        );

        Ok(Self::new(exchange, engine, contexts, proxy, live_config))
    }

    /// Stateless counterpart of a live publish: mint a token for this call
    /// only, then run the same decorator chain the bridge runs.
    pub async fn http_call_context(
        &self,
        headers: &HeaderMap,
        trace_id: &str,
        cancel: CancellationToken,
    ) -> Result<CallContext, BridgeError> {
        let mut token = String::new();

        if self.exchange.is_enabled() {
            let has_id_token = headers.get(ID_TOKEN_HEADER).is_some_and(|v| !v.is_empty());
            if !has_id_token {
                return Err(BridgeError::MissingIdToken {
                    header: "X-Grafana-Id",
                });
            }

            let minted = tokio::select! {
                minted = self.exchange.access_token() => minted,
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled(MCP_HTTP_PATH.to_string())),
            };
            token = minted
                .map_err(|source| BridgeError::InitialExchange {
                    path: MCP_HTTP_PATH.to_string(),
                    source,
                })?
                .as_str()
                .to_string();
        }

        let headers = with_access_token(headers.clone(), &token).map_err(|_| BridgeError::Internal {
            path: MCP_HTTP_PATH.to_string(),
            reason: "access token is not a valid header value".to_string(),
        })?;

        Ok(self
            .contexts
            .apply(CallContext::new(trace_id, cancel), &headers))
    }
}
