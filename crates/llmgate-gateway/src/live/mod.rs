//! Protocol Bridge (Live Server)
//!
//! Carries the MCP engine over a publish/subscribe channel. A subscriber on
//! `P/subscribe` owns the session for `P`; messages published to `P/publish`
//! are dispatched to the engine with the session's current access token and
//! the response is pushed back through the subscriber's sender.
//!
//! Session lifecycle: `Starting` (initial exchange) → `Active` (registered,
//! refresh task running) → `Closing` (loop exited) → `Closed` (registry entry
//! removed by the `SessionHandle` drop, the only removal point).

mod channel;
mod paths;
mod session;

pub use channel::{ChannelSender, PublishRequest, StreamSender, SubscribeRequest};
pub use paths::{derive_logical_path, publish_path, subscribe_path, PUBLISH_SUFFIX, SUBSCRIBE_SUFFIX};
pub use session::{Session, SessionRegistry, SessionState};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{AccessToken, TokenExchange, REFRESH_INTERVAL};
use crate::error::BridgeError;
use crate::logging::{RequestSpan, TraceContext};
use crate::mcp::{with_access_token, CallContext, ContextChain, ProtocolEngine, ID_TOKEN_HEADER};

/// Display name of the correlation header in errors
const ID_TOKEN_HEADER_NAME: &str = "X-Grafana-Id";

/// Bridge tuning
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Delay between token refreshes; must stay below the token lifetime
    pub refresh_interval: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            refresh_interval: REFRESH_INTERVAL,
        }
    }
}

impl LiveConfig {
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}

struct LiveInner {
    registry: SessionRegistry,
    exchange: Arc<dyn TokenExchange>,
    engine: Arc<dyn ProtocolEngine>,
    contexts: ContextChain,
    shutdown: CancellationToken,
    config: LiveConfig,
}

/// The bridge. Cheap to clone; all clones share one registry and shutdown signal.
#[derive(Clone)]
pub struct LiveServer {
    inner: Arc<LiveInner>,
}

impl LiveServer {
    pub fn new(
        exchange: Arc<dyn TokenExchange>,
        engine: Arc<dyn ProtocolEngine>,
        contexts: ContextChain,
        config: LiveConfig,
    ) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                registry: SessionRegistry::new(),
                exchange,
                engine,
                contexts,
                shutdown: CancellationToken::new(),
                config,
            }),
        }
    }

    pub fn requires_exchange(&self) -> bool {
        self.inner.exchange.is_enabled()
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether `path` (logical or physical) has a registered session
    pub fn has_session(&self, path: &str) -> bool {
        self.inner.registry.contains(derive_logical_path(path))
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Signal every session loop to exit. Safe to call more than once.
    pub fn close(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!(sessions = ?self.inner.registry.paths(), "[LiveServer] Shutting down");
        }
        self.inner.shutdown.cancel();
    }

    /// Token for a new session: one exchange, raced against the subscriber's
    /// cancellation and shutdown
    async fn initial_token(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, BridgeError> {
        if !self.inner.exchange.is_enabled() {
            return Ok(AccessToken::empty());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(path, "[LiveServer] Subscriber went away during initial exchange");
                Err(BridgeError::Cancelled(path.to_string()))
            }
            _ = self.inner.shutdown.cancelled() => Err(BridgeError::Closed),
            minted = self.inner.exchange.access_token() => {
                minted.map_err(|source| {
                    warn!(path, error = %source, "[LiveServer] Initial token exchange failed");
                    BridgeError::InitialExchange { path: path.to_string(), source }
                })
            }
        }
    }

    /// Start a session: initial exchange, then registration.
    ///
    /// Nothing is registered when the exchange fails or `cancel` fires first.
    /// The returned handle must be `run` (or dropped) by the subscriber.
    pub async fn open_session(
        &self,
        request: &SubscribeRequest,
        sender: Arc<dyn StreamSender>,
        cancel: &CancellationToken,
    ) -> Result<SessionHandle, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }

        let path = derive_logical_path(&request.path).to_string();
        if self.inner.registry.contains(&path) {
            return Err(BridgeError::StreamAlreadyActive(path));
        }

        let token = self.initial_token(&path, cancel).await?;
        let session = Arc::new(Session::new(path.clone(), sender, token));
        self.inner.registry.insert(Arc::clone(&session))?;
        session.set_state(SessionState::Active);

        info!(
            path = %path,
            session_id = %session.id(),
            exchange = self.inner.exchange.is_enabled(),
            "[LiveServer] Session started"
        );

        Ok(SessionHandle {
            server: self.clone(),
            session,
        })
    }

    /// Subscribe handler: open the session and block until it ends
    pub async fn run_stream(
        &self,
        request: SubscribeRequest,
        sender: Arc<dyn StreamSender>,
        cancel: CancellationToken,
    ) -> Result<(), BridgeError> {
        let handle = self.open_session(&request, sender, &cancel).await?;
        handle.run(cancel).await
    }

    /// Publish handler: dispatch one message and send exactly one payload back
    pub async fn publish(
        &self,
        request: PublishRequest,
        cancel: CancellationToken,
    ) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }

        let path = derive_logical_path(&request.path).to_string();
        let session = self
            .inner
            .registry
            .get(&path)
            .filter(|s| s.is_active())
            .ok_or_else(|| BridgeError::StreamNotFound(path.clone()))?;

        let token = session.token();

        if self.inner.exchange.is_enabled() {
            let has_id_token = request
                .headers
                .get(ID_TOKEN_HEADER)
                .is_some_and(|v| !v.is_empty());
            if !has_id_token {
                return Err(BridgeError::MissingIdToken {
                    header: ID_TOKEN_HEADER_NAME,
                });
            }
            if token.is_empty() || token.is_expired() {
                return Err(BridgeError::TokenExpired(path));
            }
        }

        if let Err(source) = serde_json::from_slice::<serde::de::IgnoredAny>(&request.data) {
            return Err(BridgeError::InvalidMessage { path, source });
        }

        let trace = TraceContext::new("PUBLISH", &path)
            .with_rpc_method(TraceContext::rpc_method_of(&request.data));
        RequestSpan::log_entry(&trace);

        let headers = with_access_token(request.headers, token.as_str()).map_err(|_| {
            BridgeError::Internal {
                path: path.clone(),
                reason: "access token is not a valid header value".to_string(),
            }
        })?;
        let ctx = self
            .inner
            .contexts
            .apply(CallContext::new(trace.trace_id.clone(), cancel), &headers);

        let response = self.inner.engine.handle_message(ctx, &request.data).await;
        let is_notification = response.is_none();
        let payload = response.unwrap_or_else(Bytes::new);

        session
            .sender()
            .send(payload)
            .await
            .map_err(|source| BridgeError::Send {
                path: path.clone(),
                source,
            })?;

        RequestSpan::log_exit(
            &trace,
            200,
            Some(if is_notification { "notification" } else { "response" }),
        );
        Ok(())
    }
}

/// A registered session. Dropping the handle removes the registry entry.
pub struct SessionHandle {
    server: LiveServer,
    session: Arc<Session>,
}

enum Exit {
    Cancelled,
    Shutdown,
    Refresher(Result<Result<(), BridgeError>, tokio::task::JoinError>),
}

impl SessionHandle {
    pub fn path(&self) -> &str {
        self.session.path()
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Block until `cancel` fires (client gone), the bridge shuts down, or a
    /// token refresh fails. The refresh task is joined before returning.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BridgeError> {
        let inner = Arc::clone(&self.server.inner);
        let path = self.session.path().to_string();
        let scope = cancel.child_token();

        let mut refresher = inner.exchange.is_enabled().then(|| {
            tokio::spawn(refresh_loop(
                Arc::clone(&inner.exchange),
                Arc::clone(&self.session),
                inner.config.refresh_interval,
                scope.clone(),
            ))
        });

        let exit = tokio::select! {
            biased;
            _ = cancel.cancelled() => Exit::Cancelled,
            _ = inner.shutdown.cancelled() => Exit::Shutdown,
            joined = wait_for(&mut refresher) => Exit::Refresher(joined),
        };

        self.session.set_state(SessionState::Closing);
        scope.cancel();

        let result = match exit {
            Exit::Cancelled => {
                join(refresher).await;
                Err(BridgeError::Cancelled(path.clone()))
            }
            Exit::Shutdown => {
                join(refresher).await;
                Ok(())
            }
            Exit::Refresher(Ok(result)) => result,
            Exit::Refresher(Err(e)) => Err(BridgeError::Internal {
                path: path.clone(),
                reason: e.to_string(),
            }),
        };

        debug!(path = %path, session_id = %self.session.id(), ok = result.is_ok(), "[LiveServer] Session loop exited");
        result
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.session.set_state(SessionState::Closed);
        if self.server.inner.registry.remove(&self.session) {
            info!(
                path = %self.session.path(),
                session_id = %self.session.id(),
                remaining = self.server.session_count(),
                "[LiveServer] Session closed"
            );
        }
    }
}

/// Wait for a refresh task that has not completed yet
async fn join(task: Option<JoinHandle<Result<(), BridgeError>>>) {
    if let Some(task) = task {
        let _ = task.await;
    }
}

async fn wait_for(
    task: &mut Option<JoinHandle<Result<(), BridgeError>>>,
) -> Result<Result<(), BridgeError>, tokio::task::JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Refresh the session token every `interval` until `scope` is cancelled.
/// A failed exchange ends the loop and, with it, the session.
async fn refresh_loop(
    exchange: Arc<dyn TokenExchange>,
    session: Arc<Session>,
    interval: Duration,
    scope: CancellationToken,
) -> Result<(), BridgeError> {
    loop {
        tokio::select! {
            _ = scope.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }

        let minted = tokio::select! {
            _ = scope.cancelled() => return Ok(()),
            minted = exchange.access_token() => minted,
        };

        match minted {
            Ok(token) => {
                debug!(
                    path = %session.path(),
                    session_id = %session.id(),
                    token_len = token.as_str().len(),
                    "[LiveServer] Access token refreshed"
                );
                session.set_token(token);
            }
            Err(source) => {
                error!(
                    path = %session.path(),
                    session_id = %session.id(),
                    error = %source,
                    "[LiveServer] Token refresh failed, closing session"
                );
                return Err(BridgeError::TokenRefresh {
                    path: session.path().to_string(),
                    source,
                });
            }
        }
    }
}
