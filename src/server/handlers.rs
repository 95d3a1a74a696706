use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{ConnectResponse, DisconnectResponse, QueryPlanResponse, SharedState};
use crate::analysis::ChatTurn;
use crate::error::{McpError, McpResult};
use crate::plan::QueryPlan;
use crate::session::ConnectionDescriptor;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "pg_connect" => handle_connect(state, arguments).await,
        "pg_disconnect" => handle_disconnect(state, arguments).await,
        "pg_explain" => handle_explain(state, arguments).await,
        "pg_analyze_plan" => handle_analyze_plan(state, arguments).await,
        "pg_compare_plans" => handle_compare_plans(state, arguments).await,
        "pg_chat" => handle_chat(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Parameters
// ============================================================================

fn default_true() -> bool {
    true
}

/// Arguments for `pg_explain`.
#[derive(Debug, Deserialize)]
pub struct ExplainParams {
    pub session_id: String,
    pub query: String,
    /// Executes the statement when set.
    #[serde(default = "default_true")]
    pub analyze: bool,
}

/// Arguments for `pg_analyze_plan`.
#[derive(Debug, Deserialize)]
pub struct AnalyzePlanParams {
    /// Explain output in any accepted shape.
    pub plan: Value,
    #[serde(default)]
    pub query: Option<String>,
}

/// Arguments for `pg_compare_plans`.
#[derive(Debug, Deserialize)]
pub struct ComparePlansParams {
    #[serde(alias = "plan1")]
    pub plan_a: Value,
    #[serde(alias = "plan2")]
    pub plan_b: Value,
    #[serde(default, alias = "query1")]
    pub query_a: Option<String>,
    #[serde(default, alias = "query2")]
    pub query_b: Option<String>,
}

/// Arguments for `pg_chat`.
#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub plan: Value,
    #[serde(default)]
    pub query: Option<String>,
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
struct DisconnectParams {
    session_id: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle pg_connect: probe the target and open a session
async fn handle_connect(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let descriptor: ConnectionDescriptor = parse_arguments("pg_connect", arguments)?;

    let response = match state.registry.connect(descriptor).await {
        Ok(connected) => ConnectResponse::connected(&connected),
        Err(e) => {
            warn!(error = %e, "Connect failed");
            ConnectResponse::failed(e)
        }
    };

    to_value(response)
}

/// Handle pg_disconnect: drop a session
async fn handle_disconnect(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: DisconnectParams = parse_arguments("pg_disconnect", arguments)?;

    let response = if state.registry.evict(&params.session_id) {
        DisconnectResponse {
            success: true,
            message: "Session closed".to_string(),
        }
    } else {
        DisconnectResponse {
            success: false,
            message: format!("Invalid or expired session ID: {}", params.session_id),
        }
    };

    to_value(response)
}

/// Handle pg_explain: fetch a plan for a statement
async fn handle_explain(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: ExplainParams = parse_arguments("pg_explain", arguments)?;
    require_text("pg_explain", "query", &params.query)?;

    let descriptor = state
        .registry
        .resolve(&params.session_id)
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    let response = match state
        .executor
        .explain(&descriptor, &params.query, params.analyze)
        .await
    {
        Ok(plan) => QueryPlanResponse::planned(plan, params.query),
        Err(e) => QueryPlanResponse::failed(e.to_string()),
    };

    to_value(response)
}

/// Handle pg_analyze_plan: critique one plan
async fn handle_analyze_plan(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("pg_analyze_plan", arguments, |params: AnalyzePlanParams| async move {
        let plan = parse_plan("pg_analyze_plan", "plan", params.plan)?;
        state
            .orchestrator
            .analyze(&plan, params.query.as_deref())
            .await
            .map_err(McpError::from)
    })
    .await
}

/// Handle pg_compare_plans: critique two plans side by side
async fn handle_compare_plans(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("pg_compare_plans", arguments, |params: ComparePlansParams| async move {
        let plan_a = parse_plan("pg_compare_plans", "plan_a", params.plan_a)?;
        let plan_b = parse_plan("pg_compare_plans", "plan_b", params.plan_b)?;
        state
            .orchestrator
            .compare(
                &plan_a,
                &plan_b,
                params.query_a.as_deref(),
                params.query_b.as_deref(),
            )
            .await
            .map_err(McpError::from)
    })
    .await
}

/// Handle pg_chat: one conversational turn about a plan
async fn handle_chat(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("pg_chat", arguments, |params: ChatParams| async move {
        require_text("pg_chat", "message", &params.message)?;
        let plan = parse_plan("pg_chat", "plan", params.plan)?;
        state
            .orchestrator
            .chat(
                &plan,
                params.query.as_deref(),
                &params.message,
                &params.history,
            )
            .await
            .map_err(McpError::from)
    })
    .await
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Generic handler that parses arguments, runs the operation and serializes
/// its result.
///
/// Operation errors that are not already [`McpError`]s are reported as
/// execution failures.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: Into<McpError>,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;
    let result = operation(params).await.map_err(Into::into)?;
    to_value(result)
}

fn to_value<R: Serialize>(result: R) -> McpResult<Value> {
    serde_json::to_value(result).map_err(McpError::Json)
}

fn parse_plan(tool_name: &str, field: &str, document: Value) -> McpResult<QueryPlan> {
    QueryPlan::from_document(document).map_err(|e| McpError::InvalidParameters {
        tool_name: tool_name.to_string(),
        message: format!("{}: {}", field, e),
    })
}

fn require_text(tool_name: &str, field: &str, value: &str) -> McpResult<()> {
    if value.trim().is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: format!("{} cannot be empty", field),
        });
    }
    Ok(())
}
