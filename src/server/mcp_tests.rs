//! Unit tests for MCP protocol implementation.
//!
//! Tests JSON-RPC 2.0 request/response handling, tool definitions,
//! and the request loop (dispatch, cancellation, shutdown).

use super::*;
use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::Config;
use crate::error::LlmResult;
use crate::llm::{CompletionBackend, MockCompletionBackend, PromptRequest};
use crate::server::AppState;

// ============================================================================
// JsonRpcResponse tests
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["result"], "ok");
}

#[test]
fn test_jsonrpc_response_success_without_id() {
    let response = JsonRpcResponse::success(None, json!({"data": "value"}));

    assert_eq!(response.id, Value::Null);
    assert!(response.result.is_some());
}

#[test]
fn test_jsonrpc_response_error_with_id() {
    let response = JsonRpcResponse::error(Some(json!(42)), -32600, "Invalid request");

    assert_eq!(response.id, json!(42));
    assert!(response.result.is_none());

    let error = response.error.unwrap();
    assert_eq!(error.code, -32600);
    assert_eq!(error.message, "Invalid request");
}

#[test]
fn test_jsonrpc_response_serialization() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"test": true}));
    let serialized = serde_json::to_string(&response).unwrap();

    assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
    assert!(serialized.contains("\"id\":1"));
    assert!(!serialized.contains("\"error\""));
}

#[test]
fn test_jsonrpc_request_deserialization() {
    let json_str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
    let request: JsonRpcRequest = serde_json::from_str(json_str).unwrap();

    assert_eq!(request.id, Some(json!(1)));
    assert_eq!(request.method, "initialize");
    assert!(request.params.is_some());
}

#[test]
fn test_jsonrpc_notification_no_id() {
    let json_str = r#"{"jsonrpc":"2.0","method":"initialized"}"#;
    let request: JsonRpcRequest = serde_json::from_str(json_str).unwrap();

    assert!(request.id.is_none());
    assert!(request.params.is_none());
}

#[test]
fn test_cancelled_params_deserialization() {
    let params: CancelledParams =
        serde_json::from_value(json!({"requestId": "req-7", "reason": "user aborted"})).unwrap();

    assert_eq!(params.request_id, json!("req-7"));
    assert_eq!(params.reason.as_deref(), Some("user aborted"));
}

// ============================================================================
// Tool definition tests
// ============================================================================

#[test]
fn test_all_tools_count() {
    assert_eq!(all_tools().len(), 6, "Should have exactly 6 tools defined");
}

#[test]
fn test_tool_names_are_unique() {
    let tools = all_tools();
    let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), tools.len());
}

#[test]
fn test_all_tools_have_valid_schemas() {
    for tool in all_tools() {
        assert!(tool.name.starts_with("pg_"), "{} should be namespaced", tool.name);
        assert!(!tool.description.is_empty());
        assert_eq!(
            tool.input_schema["type"], "object",
            "Schema type should be object for {}",
            tool.name
        );
        assert!(tool.input_schema["properties"].is_object());

        for required in tool.input_schema["required"].as_array().unwrap() {
            let field = required.as_str().unwrap();
            assert!(
                tool.input_schema["properties"].get(field).is_some(),
                "{} requires undeclared field {}",
                tool.name,
                field
            );
        }
    }
}

#[test]
fn test_explain_tool_warns_about_execution() {
    let tool = get_explain_tool();

    assert_eq!(tool.input_schema["properties"]["analyze"]["default"], true);
    assert!(tool.description.contains("executed"));
}

#[test]
fn test_tool_serialization_format() {
    let serialized = serde_json::to_value(get_disconnect_tool()).unwrap();

    assert!(serialized.get("inputSchema").is_some());
    assert!(serialized.get("input_schema").is_none());
}

#[test]
fn test_tool_call_result_with_error() {
    let result = ToolCallResult {
        content: vec![ToolResultContent {
            content_type: "text".to_string(),
            text: "Error: Unknown tool: nope".to_string(),
        }],
        is_error: Some(true),
    };
    let value = serde_json::to_value(result).unwrap();

    assert_eq!(value["isError"], true);
    assert_eq!(value["content"][0]["type"], "text");
}

// ============================================================================
// Request loop tests
// ============================================================================

/// A model that never answers.
struct PendingBackend;

#[async_trait]
impl CompletionBackend for PendingBackend {
    async fn generate(&self, _request: PromptRequest) -> LlmResult<String> {
        std::future::pending().await
    }
}

fn test_server(backend: Arc<dyn CompletionBackend>) -> McpServer {
    McpServer::new(Arc::new(AppState::new(Config::default(), backend)))
}

async fn exchange(server: &McpServer, input: &str) -> Vec<Value> {
    let (writer, mut output) = tokio::io::duplex(1 << 20);
    server.run_with(input.as_bytes(), writer).await.unwrap();

    let mut text = String::new();
    output.read_to_string(&mut text).await.unwrap();
    text.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn by_id(responses: &[Value], id: Value) -> &Value {
    responses
        .iter()
        .find(|r| r["id"] == id)
        .unwrap_or_else(|| panic!("no response for id {}", id))
}

#[tokio::test]
async fn test_initialize_ping_and_notifications() {
    let server = test_server(Arc::new(MockCompletionBackend::new()));
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, "\n",
        r#"{"jsonrpc":"2.0","method":"initialized"}"#, "\n",
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n",
    );

    let responses = exchange(&server, input).await;

    assert_eq!(responses.len(), 2);
    let init = by_id(&responses, json!(1));
    assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(init["result"]["serverInfo"]["name"], "pgplan-advisor");
    assert_eq!(by_id(&responses, json!(2))["result"], json!({}));
}

#[tokio::test]
async fn test_parse_error_and_unknown_method() {
    let server = test_server(Arc::new(MockCompletionBackend::new()));
    let input = concat!(
        "{not json\n",
        r#"{"jsonrpc":"2.0","id":"x","method":"resources/list"}"#, "\n",
        r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#, "\n",
    );

    let responses = exchange(&server, input).await;

    assert_eq!(responses.len(), 2);
    assert_eq!(by_id(&responses, Value::Null)["error"]["code"], -32700);
    assert_eq!(by_id(&responses, json!("x"))["error"]["code"], -32601);
}

#[tokio::test]
async fn test_tools_list() {
    let server = test_server(Arc::new(MockCompletionBackend::new()));
    let responses = exchange(
        &server,
        "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tools/list\"}\n",
    )
    .await;

    let tools = responses[0]["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 6);
}

#[tokio::test]
async fn test_unknown_tool_is_error_result() {
    let server = test_server(Arc::new(MockCompletionBackend::new()));
    let responses = exchange(
        &server,
        "{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"tools/call\",\"params\":{\"name\":\"pg_vacuum\"}}\n",
    )
    .await;

    let result = &responses[0]["result"];
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("Unknown tool: pg_vacuum"));
}

#[tokio::test]
async fn test_explain_with_unknown_session_is_error_result() {
    let server = test_server(Arc::new(MockCompletionBackend::new()));
    let request = json!({
        "jsonrpc": "2.0",
        "id": 5,
        "method": "tools/call",
        "params": {
            "name": "pg_explain",
            "arguments": {"session_id": "not-a-session", "query": "SELECT 1"}
        }
    });

    let responses = exchange(&server, &format!("{}\n", request)).await;

    let result = &responses[0]["result"];
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("Invalid or expired session ID: not-a-session"));
}

#[tokio::test]
async fn test_analyze_plan_round_trip() {
    let mut mock = MockCompletionBackend::new();
    mock.expect_generate()
        .times(1)
        .returning(|_| Ok("{\"overall_assessment\": \"fine\"}".to_string()));
    let server = test_server(Arc::new(mock));

    let request = json!({
        "jsonrpc": "2.0",
        "id": 6,
        "method": "tools/call",
        "params": {
            "name": "pg_analyze_plan",
            "arguments": {"plan": [{"Plan": {"Node Type": "Result", "Total Cost": 0.01}}]}
        }
    });

    let responses = exchange(&server, &format!("{}\n", request)).await;

    let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
    let body: Value = serde_json::from_str(text).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["analysis"]["overall_assessment"], "fine");
    assert_eq!(body["analysis"]["degraded"], false);
    assert_eq!(body["analysis"]["bottlenecks"], json!([]));
}

#[tokio::test]
async fn test_cancelled_request_gets_no_response() {
    let server = test_server(Arc::new(PendingBackend));
    let call = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {
            "name": "pg_chat",
            "arguments": {"plan": {"Node Type": "Result"}, "message": "hello?"}
        }
    });
    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": {"requestId": 7, "reason": "took too long"}
    });
    let input = format!(
        "{}\n{}\n{}\n",
        call,
        cancel,
        r#"{"jsonrpc":"2.0","id":8,"method":"ping"}"#
    );

    let responses = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        exchange(&server, &input),
    )
    .await
    .expect("server should finish once the hanging call is cancelled");

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], 8);
}

#[tokio::test]
async fn test_duplicate_in_flight_id_rejected_and_original_stays_cancellable() {
    let server = test_server(Arc::new(PendingBackend));
    let call = json!({
        "jsonrpc": "2.0",
        "id": 10,
        "method": "tools/call",
        "params": {
            "name": "pg_chat",
            "arguments": {"plan": {"Node Type": "Result"}, "message": "hello?"}
        }
    });
    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": {"requestId": 10}
    });
    let input = format!(
        "{}\n{}\n{}\n{}\n",
        call,
        call,
        cancel,
        r#"{"jsonrpc":"2.0","id":11,"method":"ping"}"#
    );

    let responses = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        exchange(&server, &input),
    )
    .await
    .expect("cancelling the id should stop the first call");

    assert_eq!(responses.len(), 2);
    let duplicate = by_id(&responses, json!(10));
    assert_eq!(duplicate["error"]["code"], -32600);
    assert!(duplicate["error"]["message"]
        .as_str()
        .unwrap()
        .contains("already in flight"));
    assert_eq!(by_id(&responses, json!(11))["result"], json!({}));
}

#[tokio::test]
async fn test_shutdown_stops_reading_and_cancels_requests() {
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(Config::default(), Arc::new(PendingBackend)));
    let server = McpServer::with_shutdown(state, shutdown.clone());

    let (mut client, server_io) = tokio::io::duplex(1 << 16);
    let (reader, writer) = tokio::io::split(server_io);

    let call = json!({
        "jsonrpc": "2.0",
        "id": 9,
        "method": "tools/call",
        "params": {
            "name": "pg_chat",
            "arguments": {"plan": {"Node Type": "Result"}, "message": "hello?"}
        }
    });
    client
        .write_all(format!("{}\n", call).as_bytes())
        .await
        .unwrap();

    let run = tokio::spawn(async move { server.run_with(reader, writer).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(5), run)
        .await
        .expect("server should stop after shutdown")
        .unwrap()
        .unwrap();
}
