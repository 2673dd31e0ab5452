//! Tool catalog
//!
//! `ToolRegistry` is built once and owned by the engine. Built-in tools call
//! the request-scoped clients from the `CallContext`, so the same registry
//! serves on-behalf-of and service-account callers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{CallToolResult, Content, ErrorData, JsonObject, Tool};
use serde_json::{json, Value};
use tracing::debug;

use super::context::CallContext;

/// One callable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> Tool;

    /// Run the tool. Upstream failures are tool results with `is_error`;
    /// `Err` is reserved for protocol-level problems.
    async fn call(&self, ctx: &CallContext, arguments: JsonObject)
        -> Result<CallToolResult, ErrorData>;
}

/// Name-ordered set of tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Grafana and incident tools
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(GetCurrentUser);
        registry.register(ListDatasources);
        registry.register(ListIncidents);
        registry
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, handler: impl ToolHandler + 'static) {
        let name = handler.definition().name.to_string();
        self.tools.insert(name, Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// JSON schema object for a tool's input
pub fn object_schema(properties: Value) -> Arc<JsonObject> {
    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), properties);
    Arc::new(schema)
}

fn json_result(value: &Value) -> CallToolResult {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    CallToolResult::success(vec![Content::text(text)])
}

fn upstream_failure(tool: &str, err: anyhow::Error) -> CallToolResult {
    debug!(tool, error = %err, "Tool upstream call failed");
    CallToolResult::error(vec![Content::text(format!("{:#}", err))])
}

/// GET /api/user
pub struct GetCurrentUser;

#[async_trait]
impl ToolHandler for GetCurrentUser {
    fn definition(&self) -> Tool {
        Tool::new(
            "get_current_user",
            "Get the Grafana user the call is made as",
            object_schema(json!({})),
        )
    }

    async fn call(&self, ctx: &CallContext, _arguments: JsonObject) -> Result<CallToolResult, ErrorData> {
        let grafana = ctx
            .grafana
            .as_ref()
            .ok_or_else(|| ErrorData::internal_error("grafana client not configured", None))?;

        match grafana.get_json("/api/user").await {
            Ok(user) => Ok(json_result(&user)),
            Err(e) => Ok(upstream_failure("get_current_user", e)),
        }
    }
}

/// GET /api/datasources, optionally filtered by type
pub struct ListDatasources;

#[async_trait]
impl ToolHandler for ListDatasources {
    fn definition(&self) -> Tool {
        Tool::new(
            "list_datasources",
            "List Grafana datasources, optionally filtered by type (e.g. prometheus)",
            object_schema(json!({
                "type": {"type": "string", "description": "Datasource type to keep"}
            })),
        )
    }

    async fn call(&self, ctx: &CallContext, arguments: JsonObject) -> Result<CallToolResult, ErrorData> {
        let grafana = ctx
            .grafana
            .as_ref()
            .ok_or_else(|| ErrorData::internal_error("grafana client not configured", None))?;

        let filter = match arguments.get("type") {
            None | Some(Value::Null) => None,
            Some(Value::String(kind)) => Some(kind.clone()),
            Some(_) => return Err(ErrorData::invalid_params("'type' must be a string", None)),
        };

        let datasources = match grafana.get_json("/api/datasources").await {
            Ok(value) => value,
            Err(e) => return Ok(upstream_failure("list_datasources", e)),
        };

        let datasources = match (filter, datasources) {
            (Some(kind), Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .filter(|ds| ds.get("type").and_then(Value::as_str) == Some(kind.as_str()))
                    .collect(),
            ),
            (_, other) => other,
        };
        Ok(json_result(&datasources))
    }
}

/// Query recent incidents. Needs the service-account incident client.
pub struct ListIncidents;

#[async_trait]
impl ToolHandler for ListIncidents {
    fn definition(&self) -> Tool {
        Tool::new(
            "list_incidents",
            "List recent incidents, newest first",
            object_schema(json!({
                "limit": {"type": "integer", "minimum": 1, "maximum": 100}
            })),
        )
    }

    async fn call(&self, ctx: &CallContext, arguments: JsonObject) -> Result<CallToolResult, ErrorData> {
        let Some(incident) = ctx.incident.as_ref() else {
            return Ok(CallToolResult::error(vec![Content::text(
                "incident service not available: a service account token is required",
            )]));
        };

        let limit = match arguments.get("limit") {
            None | Some(Value::Null) => 10,
            Some(value) => value
                .as_u64()
                .filter(|n| (1..=100).contains(n))
                .ok_or_else(|| ErrorData::invalid_params("'limit' must be between 1 and 100", None))?,
        };

        let body = json!({"query": {"limit": limit, "orderDirection": "DESC"}});
        match incident
            .post_json("/api/v1/IncidentsService.QueryIncidents", &body)
            .await
        {
            Ok(result) => Ok(json_result(&result)),
            Err(e) => Ok(upstream_failure("list_incidents", e)),
        }
    }
}
