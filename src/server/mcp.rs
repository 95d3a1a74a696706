//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Request-scoped tool tasks with `notifications/cancelled` support
//!
//! Each `tools/call` runs in its own task under a child of the server's
//! shutdown token. Cancelling a request drops its future, which closes any
//! database connection or HTTP request it had open, and no response is sent
//! for it. All output goes through a single writer task so lines never
//! interleave.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// MCP protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null when the request could not be read).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Parameters for a `notifications/cancelled` message.
#[derive(Debug, Deserialize)]
pub struct CancelledParams {
    /// Id of the request to abandon.
    #[serde(rename = "requestId")]
    pub request_id: Value,
    /// Optional client-supplied reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Cancellation handles of running tool calls, keyed by serialized request id.
type InFlight = Arc<DashMap<String, CancellationToken>>;

/// MCP Server running over stdio.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
    /// Parent of every request token.
    shutdown: CancellationToken,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self::with_shutdown(state, CancellationToken::new())
    }

    /// Create a server that stops when `shutdown` is cancelled
    pub fn with_shutdown(state: SharedState, shutdown: CancellationToken) -> Self {
        Self { state, shutdown }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve line-delimited JSON-RPC from `reader`, writing responses to `writer`.
    ///
    /// Returns after EOF or shutdown, once every in-flight request has
    /// finished and its response has been flushed.
    pub async fn run_with<R, W>(&self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("pgplan-advisor MCP server starting...");

        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let in_flight: InFlight = Arc::new(DashMap::new());
        let mut tasks = JoinSet::new();
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, no longer reading requests");
                    break;
                }
            };

            let Some(line) = line else {
                info!("EOF received, shutting down");
                break;
            };

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.dispatch(request, &tx, &in_flight, &mut tasks),
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    send(
                        &tx,
                        JsonRpcResponse::error(None, -32700, format!("Parse error: {}", e)),
                    );
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        drop(tx);
        writer_task.await.map_err(std::io::Error::other)?
    }

    /// Answer protocol methods inline; spawn tool calls.
    ///
    /// Request bodies are never logged since `pg_connect` carries a password.
    fn dispatch(
        &self,
        request: JsonRpcRequest,
        tx: &UnboundedSender<JsonRpcResponse>,
        in_flight: &InFlight,
        tasks: &mut JoinSet<()>,
    ) {
        debug!(method = %request.method, id = ?request.id, "Received request");

        let is_notification = request.id.is_none();
        let response = match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" => {
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                handle_cancelled(request.params, in_flight);
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => {
                self.spawn_tool_call(request.id, request.params, tx, in_flight, tasks);
                None
            }
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        };

        if let Some(response) = response {
            send(tx, response);
        }
    }

    fn spawn_tool_call(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        tx: &UnboundedSender<JsonRpcResponse>,
        in_flight: &InFlight,
        tasks: &mut JoinSet<()>,
    ) {
        let token = self.shutdown.child_token();
        let key = id.as_ref().map(Value::to_string);
        if let Some(key) = &key {
            match in_flight.entry(key.clone()) {
                Entry::Occupied(_) => {
                    warn!(request_id = %key, "Rejecting tool call whose id is already in flight");
                    send(
                        tx,
                        JsonRpcResponse::error(
                            id,
                            -32600,
                            format!("Invalid request: id {} is already in flight", key),
                        ),
                    );
                    return;
                }
                Entry::Vacant(entry) => {
                    entry.insert(token.clone());
                }
            }
        }

        let state = Arc::clone(&self.state);
        let tx = tx.clone();
        let in_flight = Arc::clone(in_flight);

        tasks.spawn(async move {
            let response = tokio::select! {
                response = call_tool(&state, id, params) => Some(response),
                _ = token.cancelled() => None,
            };

            if let Some(key) = &key {
                in_flight.remove(key);
            }

            match response {
                Some(response) => send(&tx, response),
                None => info!(request_id = ?key, "Tool call cancelled"),
            }
        });
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        JsonRpcResponse::success(id, serde_json::json!({ "tools": all_tools() }))
    }
}

/// Handle tools/call request
async fn call_tool(state: &SharedState, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
    let params: ToolCallParams = match params {
        Some(p) => match serde_json::from_value(p) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
            }
        },
        None => {
            return JsonRpcResponse::error(id, -32602, "Missing params");
        }
    };

    info!(tool = %params.name, "Handling tool call");

    let (content, is_error) = match handle_tool_call(state, &params.name, params.arguments).await {
        Ok(result) => {
            let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                error!(error = %e, "Failed to serialize tool result");
                format!("{{\"error\": \"Serialization failed: {}\"}}", e)
            });
            (
                ToolResultContent {
                    content_type: "text".to_string(),
                    text,
                },
                None,
            )
        }
        Err(e) => {
            warn!(tool = %params.name, error = %e, "Tool call failed");
            (
                ToolResultContent {
                    content_type: "text".to_string(),
                    text: format!("Error: {}", e),
                },
                Some(true),
            )
        }
    };

    let tool_result = ToolCallResult {
        content: vec![content],
        is_error,
    };

    match serde_json::to_value(tool_result) {
        Ok(val) => JsonRpcResponse::success(id, val),
        Err(e) => {
            error!(error = %e, "Failed to serialize tool call result");
            JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
        }
    }
}

fn handle_cancelled(params: Option<Value>, in_flight: &InFlight) {
    let Some(params) = params.and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
    else {
        debug!("Ignoring malformed cancellation");
        return;
    };

    let key = params.request_id.to_string();
    match in_flight.remove(&key) {
        Some((_, token)) => {
            info!(request_id = %key, reason = ?params.reason, "Cancelling request");
            token.cancel();
        }
        None => debug!(request_id = %key, "Cancellation for unknown or finished request"),
    }
}

fn send(tx: &UnboundedSender<JsonRpcResponse>, response: JsonRpcResponse) {
    if tx.send(response).is_err() {
        warn!("Response writer closed; dropping response");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Request task failed");
    }
}

async fn write_responses<W>(
    mut writer: W,
    mut rx: UnboundedReceiver<JsonRpcResponse>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let response_json = serde_json::to_string(&response)?;
        debug!(id = %response.id, is_error = response.error.is_some(), "Sending response");

        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Every tool this server exposes.
pub fn all_tools() -> Vec<Tool> {
    vec![
        get_connect_tool(),
        get_disconnect_tool(),
        get_explain_tool(),
        get_analyze_plan_tool(),
        get_compare_plans_tool(),
        get_chat_tool(),
    ]
}

/// Get the connect tool definition
fn get_connect_tool() -> Tool {
    Tool {
        name: "pg_connect".to_string(),
        description: "Verify connectivity to a PostgreSQL database and open a session. Returns a session_id for the other tools.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "host": {
                    "type": "string",
                    "description": "Database host"
                },
                "port": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 65535,
                    "default": 5432,
                    "description": "Database port"
                },
                "username": {
                    "type": "string",
                    "description": "Role to connect as"
                },
                "password": {
                    "type": "string",
                    "description": "Password for the role (held in memory for the session only)"
                },
                "database": {
                    "type": "string",
                    "description": "Database name"
                }
            },
            "required": ["host", "username", "database"]
        }),
    }
}

/// Get the disconnect tool definition
fn get_disconnect_tool() -> Tool {
    Tool {
        name: "pg_disconnect".to_string(),
        description: "Close a session opened with pg_connect.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to close"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the explain tool definition
fn get_explain_tool() -> Tool {
    Tool {
        name: "pg_explain".to_string(),
        description: "Run EXPLAIN (FORMAT JSON) for a SQL statement and return the plan tree. With analyze=true the statement is executed, so data-modifying statements take effect.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session returned by pg_connect"
                },
                "query": {
                    "type": "string",
                    "description": "SQL statement to explain"
                },
                "analyze": {
                    "type": "boolean",
                    "default": true,
                    "description": "Execute the statement to collect actual timings and row counts"
                }
            },
            "required": ["session_id", "query"],
            "additionalProperties": false
        }),
    }
}

/// Get the single-plan analysis tool definition
fn get_analyze_plan_tool() -> Tool {
    Tool {
        name: "pg_analyze_plan".to_string(),
        description: "Ask the model for bottlenecks, index recommendations and query rewrites for one plan.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "plan": {
                    "description": "EXPLAIN (FORMAT JSON) output, as returned by pg_explain or psql"
                },
                "query": {
                    "type": "string",
                    "description": "Optional SQL the plan was produced for"
                }
            },
            "required": ["plan"]
        }),
    }
}

/// Get the plan comparison tool definition
fn get_compare_plans_tool() -> Tool {
    Tool {
        name: "pg_compare_plans".to_string(),
        description: "Compare two plans (A and B) and explain which is better and why.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "plan_a": {
                    "description": "First plan"
                },
                "plan_b": {
                    "description": "Second plan"
                },
                "query_a": {
                    "type": "string",
                    "description": "Optional SQL for plan A"
                },
                "query_b": {
                    "type": "string",
                    "description": "Optional SQL for plan B"
                }
            },
            "required": ["plan_a", "plan_b"]
        }),
    }
}

/// Get the plan chat tool definition
fn get_chat_tool() -> Tool {
    Tool {
        name: "pg_chat".to_string(),
        description: "Ask a follow-up question about a plan.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "plan": {
                    "description": "Plan under discussion"
                },
                "query": {
                    "type": "string",
                    "description": "Optional SQL the plan was produced for"
                },
                "message": {
                    "type": "string",
                    "description": "The question"
                },
                "history": {
                    "type": "array",
                    "description": "Earlier turns of the conversation",
                    "items": {
                        "type": "object",
                        "properties": {
                            "role": {
                                "type": "string",
                                "enum": ["user", "assistant", "ai"]
                            },
                            "content": {
                                "type": "string"
                            }
                        },
                        "required": ["role", "content"]
                    }
                }
            },
            "required": ["plan", "message"]
        }),
    }
}
