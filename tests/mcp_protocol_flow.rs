//! End-to-end coverage of the streamable HTTP `/mcp` endpoint: initialize
//! handshake mints a session, subsequent tool calls require it.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use mcpforge::event::KvEventStore;
use mcpforge::kv::MemoryKv;
use mcpforge::registry::tools::{HandlerMode, ToolDefinition, ToolHandler, ToolInvocationExtra, ToolResult, ToolRegistry};
use mcpforge::registry::workflows::WorkflowEngine;
use mcpforge::session::SessionManager;
use mcpforge::transport::http::{routes, HttpTransportState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn build_state() -> Arc<HttpTransportState> {
    let tools = Arc::new(ToolRegistry::new());
    tools
        .register_tool(
            ToolDefinition {
                name: "echo".into(),
                description: "echoes its input".into(),
                input_schema: json!({"type": "object"}),
                handler_mode: HandlerMode::Native,
            },
            Arc::new(|args: Value, _extra: ToolInvocationExtra| async move {
                let text = args.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                Ok(ToolResult::ok(text))
            }) as Arc<dyn ToolHandler>,
        )
        .unwrap();

    Arc::new(HttpTransportState {
        tools,
        workflows: Arc::new(WorkflowEngine::new()),
        sessions: Arc::new(SessionManager::new(chrono::Duration::minutes(30), std::time::Duration::from_secs(300))),
        events: Arc::new(KvEventStore::new(Arc::new(MemoryKv::new()))),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn initialize_then_tool_call_echoes_argument() {
    let state = build_state();

    let init_request = Request::post("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"jsonrpc":"2.0","method":"initialize","id":1,"params":{"protocolVersion":"2025-03-26"}}).to_string(),
        ))
        .unwrap();
    let init_response = routes(state.clone()).oneshot(init_request).await.unwrap();
    assert_eq!(init_response.status(), StatusCode::OK);
    let session_id = init_response
        .headers()
        .get("mcp-session-id")
        .expect("initialize must mint a session id")
        .to_str()
        .unwrap()
        .to_string();

    let call_request = Request::post("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", session_id)
        .body(Body::from(
            json!({"jsonrpc":"2.0","method":"tools/call","id":2,"params":{"name":"echo","arguments":{"text":"hi"}}})
                .to_string(),
        ))
        .unwrap();
    let call_response = routes(state).oneshot(call_request).await.unwrap();
    assert_eq!(call_response.status(), StatusCode::OK);
    let body = body_json(call_response).await;
    assert_eq!(body["result"]["content"][0], json!({"type": "text", "text": "hi"}));
}

#[tokio::test]
async fn tool_call_without_session_header_is_rejected() {
    let state = build_state();
    let request = Request::post("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"jsonrpc":"2.0","method":"tools/call","id":1,"params":{"name":"echo","arguments":{}}}).to_string(),
        ))
        .unwrap();
    let response = routes(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_tool_name_is_an_mcp_error() {
    let state = build_state();
    let init_request = Request::post("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(json!({"jsonrpc":"2.0","method":"initialize","id":1,"params":{}}).to_string()))
        .unwrap();
    let init_response = routes(state.clone()).oneshot(init_request).await.unwrap();
    let session_id = init_response.headers().get("mcp-session-id").unwrap().to_str().unwrap().to_string();

    let call_request = Request::post("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", session_id)
        .body(Body::from(
            json!({"jsonrpc":"2.0","method":"tools/call","id":2,"params":{"name":"nonexistent","arguments":{}}})
                .to_string(),
        ))
        .unwrap();
    let response = routes(state).oneshot(call_request).await.unwrap();
    assert_ne!(response.status(), StatusCode::OK);
}
