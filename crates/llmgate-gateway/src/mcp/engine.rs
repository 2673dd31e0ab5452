//! Protocol engine seam and the embedded MCP server
//!
//! The bridge only knows `ProtocolEngine::handle_message`: raw bytes in, raw
//! response bytes or nothing out. `McpEngine` runs an rmcp server over an
//! in-memory transport with `GatewayHandler` as its `ServerHandler`. Each
//! message carries its `CallContext` in the rmcp request extensions.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::channel::mpsc;
use futures::StreamExt;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientJsonRpcMessage, ClientNotification, ClientRequest,
    CustomRequest, CustomResult, ErrorCode, Extensions, GetExtensions, Implementation,
    InitializeRequestParams, InitializeResult, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcVersion2_0, ListToolsResult, NumberOrString, PaginatedRequestParams,
    ProtocolVersion, RequestId, ServerCapabilities, ServerInfo, ServerJsonRpcMessage, Tool,
    ToolsCapability,
};
use rmcp::service::{serve_directly, RequestContext, RunningService};
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::context::CallContext;
use super::tools::ToolRegistry;

/// Embedded JSON-RPC dispatcher
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Handle one raw message. `None` means no response is due (notification).
    async fn handle_message(&self, ctx: CallContext, message: &[u8]) -> Option<Bytes>;
}

/// Versions we answer with as-is; anything else gets `LATEST`
const SUPPORTED_PROTOCOL_VERSIONS: [ProtocolVersion; 2] =
    [ProtocolVersion::V_2024_11_05, ProtocolVersion::LATEST];

/// Keep the client's version when we speak it, otherwise offer ours
fn negotiate_protocol_version(requested: ProtocolVersion) -> ProtocolVersion {
    if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
        requested
    } else {
        debug!(client_version = %requested, our_max = %ProtocolVersion::LATEST, "Client protocol not supported, negotiating down");
        ProtocolVersion::LATEST
    }
}

fn call_context(extensions: &Extensions) -> Result<&CallContext, McpError> {
    extensions
        .get::<CallContext>()
        .ok_or_else(|| McpError::internal_error("call context missing", None))
}

/// MCP server handler backed by a tool registry
#[derive(Clone)]
pub struct GatewayHandler {
    name: String,
    version: String,
    instructions: Option<String>,
    tools: Arc<ToolRegistry>,
}

impl GatewayHandler {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            name: "llmgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: Some(
                "Grafana tools executed with the caller's credentials.".to_string(),
            ),
            tools: Arc::new(tools),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

impl ServerHandler for GatewayHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_tools_with(ToolsCapability {
                    list_changed: Some(false),
                })
                .build(),
            server_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                ..Default::default()
            },
            instructions: self.instructions.clone(),
        }
    }

    // Peer info is not recorded: one server instance answers every caller
    async fn initialize(
        &self,
        params: InitializeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        let ctx = call_context(&context.extensions)?;
        let protocol_version = negotiate_protocol_version(params.protocol_version);
        debug!(trace_id = %ctx.trace_id, protocol_version = %protocol_version, "Client initializing");

        Ok(InitializeResult {
            protocol_version,
            ..self.get_info()
        })
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools.definitions()))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.get(name).map(|handler| handler.definition())
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = call_context(&context.extensions)?;
        let handler = self
            .tools
            .get(&params.name)
            .ok_or_else(|| McpError::invalid_params(format!("unknown tool: {}", params.name), None))?;

        debug!(trace_id = %ctx.trace_id, tool = %params.name, mode = ctx.credentials.mode(), "call_tool");

        tokio::select! {
            result = handler.call(ctx, params.arguments.unwrap_or_default()) => result,
            _ = ctx.cancel.cancelled() => Err(McpError::internal_error("request cancelled", None)),
            _ = context.ct.cancelled() => Err(McpError::internal_error("request cancelled", None)),
        }
    }

    async fn on_custom_request(
        &self,
        request: CustomRequest,
        _context: RequestContext<RoleServer>,
    ) -> Result<CustomResult, McpError> {
        Err(McpError::new(
            ErrorCode::METHOD_NOT_FOUND,
            format!("method not found: {}", request.method),
            None,
        ))
    }
}

type Pending = DashMap<RequestId, oneshot::Sender<ServerJsonRpcMessage>>;

/// A running rmcp server fed through in-memory channels.
///
/// Client ids are not unique across callers, so every request is renumbered
/// on the way in and given its original id back on the way out.
struct EmbeddedServer {
    inbound: mpsc::UnboundedSender<ClientJsonRpcMessage>,
    pending: Arc<Pending>,
    next_id: AtomicI64,
    _service: RunningService<RoleServer, GatewayHandler>,
}

impl EmbeddedServer {
    fn start(handler: GatewayHandler) -> Self {
        let (inbound, inbound_rx) = mpsc::unbounded::<ClientJsonRpcMessage>();
        let (outbound, mut outbound_rx) = mpsc::unbounded::<ServerJsonRpcMessage>();
        let service: RunningService<RoleServer, GatewayHandler> =
            serve_directly(handler, (outbound, inbound_rx), None);

        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let routes = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.next().await {
                let id = match &message {
                    JsonRpcMessage::Response(response) => response.id.clone(),
                    JsonRpcMessage::Error(error) => error.id.clone(),
                    JsonRpcMessage::Request(_) | JsonRpcMessage::Notification(_) => {
                        debug!("Dropping server-initiated message");
                        continue;
                    }
                };
                if let Some((_, reply)) = routes.remove(&id) {
                    let _ = reply.send(message);
                }
            }
            debug!("Protocol engine stopped");
        });

        Self {
            inbound,
            pending,
            next_id: AtomicI64::new(1),
            _service: service,
        }
    }

    async fn request(&self, request: ClientRequest) -> Result<ServerJsonRpcMessage, McpError> {
        let id = NumberOrString::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, response) = oneshot::channel();
        self.pending.insert(id.clone(), reply);

        if self
            .inbound
            .unbounded_send(ClientJsonRpcMessage::request(request, id.clone()))
            .is_err()
        {
            self.pending.remove(&id);
            return Err(McpError::internal_error("protocol engine stopped", None));
        }

        response
            .await
            .map_err(|_| McpError::internal_error("protocol engine dropped the request", None))
    }

    fn notify(&self, notification: ClientNotification) {
        let message = ClientJsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            notification,
        });
        if self.inbound.unbounded_send(message).is_err() {
            warn!("Protocol engine stopped, notification dropped");
        }
    }
}

/// MCP engine: the `ProtocolEngine` seam over an embedded rmcp server
pub struct McpEngine {
    handler: GatewayHandler,
    server: OnceLock<EmbeddedServer>,
}

impl McpEngine {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            handler: GatewayHandler::new(tools),
            server: OnceLock::new(),
        }
    }

    pub fn with_builtin_tools() -> Self {
        Self::new(ToolRegistry::with_builtin_tools())
    }

    pub fn handler(&self) -> &GatewayHandler {
        &self.handler
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.handler.tools()
    }

    // Started on first use so construction does not need a runtime
    fn server(&self) -> &EmbeddedServer {
        self.server
            .get_or_init(|| EmbeddedServer::start(self.handler.clone()))
    }
}

fn encode(message: &ServerJsonRpcMessage) -> Bytes {
    match serde_json::to_vec(message) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            warn!(error = %e, "Failed to encode response");
            error_without_id(McpError::internal_error("failed to encode response", None))
        }
    }
}

// `RequestId` has no null form
fn error_without_id(error: McpError) -> Bytes {
    Bytes::from(json!({"jsonrpc": JsonRpcVersion2_0, "id": Value::Null, "error": error}).to_string())
}

/// Answer for bytes that are not a client message
fn reject(ctx: &CallContext, raw: &[u8], cause: serde_json::Error) -> Option<Bytes> {
    let value: Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(trace_id = %ctx.trace_id, error = %e, "Rejected unparsable message");
            return Some(error_without_id(McpError::parse_error(
                format!("parse error: {}", e),
                None,
            )));
        }
    };

    warn!(trace_id = %ctx.trace_id, error = %cause, "Rejected JSON-RPC message");
    let error = McpError::invalid_request(format!("invalid message: {}", cause), None);
    match (value.get("id"), value.get("method")) {
        (None, Some(_)) => None,
        (Some(id), _) => match serde_json::from_value::<RequestId>(id.clone()) {
            Ok(id) => Some(encode(&ServerJsonRpcMessage::error(error, id))),
            Err(_) => Some(error_without_id(error)),
        },
        (None, None) => Some(error_without_id(error)),
    }
}

fn with_id(message: ServerJsonRpcMessage, id: RequestId) -> ServerJsonRpcMessage {
    match message {
        JsonRpcMessage::Response(mut response) => {
            response.id = id;
            JsonRpcMessage::Response(response)
        }
        JsonRpcMessage::Error(mut error) => {
            error.id = id;
            JsonRpcMessage::Error(error)
        }
        other => other,
    }
}

#[async_trait]
impl ProtocolEngine for McpEngine {
    async fn handle_message(&self, ctx: CallContext, message: &[u8]) -> Option<Bytes> {
        let parsed = match serde_json::from_slice::<ClientJsonRpcMessage>(message) {
            Ok(parsed) => parsed,
            Err(cause) => return reject(&ctx, message, cause),
        };

        match parsed {
            JsonRpcMessage::Request(JsonRpcRequest { id, mut request, .. }) => {
                let method = request.method().to_string();
                let trace_id = ctx.trace_id.clone();
                request.extensions_mut().insert(ctx);

                let reply = match self.server().request(request).await {
                    Ok(reply) => with_id(reply, id),
                    Err(error) => ServerJsonRpcMessage::error(error, id),
                };
                if let JsonRpcMessage::Error(failed) = &reply {
                    debug!(trace_id = %trace_id, method = %method, code = failed.error.code.0, "Request failed");
                }
                Some(encode(&reply))
            }
            JsonRpcMessage::Notification(JsonRpcNotification { mut notification, .. }) => {
                debug!(trace_id = %ctx.trace_id, "Notification received");
                // Request ids are renumbered, so client cancellations cannot be matched
                if !matches!(notification, ClientNotification::CancelledNotification(_)) {
                    notification.extensions_mut().insert(ctx);
                    self.server().notify(notification);
                }
                None
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_) => {
                debug!(trace_id = %ctx.trace_id, "Ignoring client response");
                None
            }
        }
    }
}
