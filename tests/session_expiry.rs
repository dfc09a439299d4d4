//! Session expiry (spec.md §8 scenario 5): after the cleanup ticker evicts
//! an inactive session, GET reports it as gone rather than unknown, and
//! DELETE is idempotent.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use mcpforge::event::KvEventStore;
use mcpforge::kv::MemoryKv;
use mcpforge::registry::tools::ToolRegistry;
use mcpforge::registry::workflows::WorkflowEngine;
use mcpforge::session::SessionManager;
use mcpforge::transport::http::{routes, HttpTransportState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tower::ServiceExt;

fn build_state(max_age: chrono::Duration) -> Arc<HttpTransportState> {
    Arc::new(HttpTransportState {
        tools: Arc::new(ToolRegistry::new()),
        workflows: Arc::new(WorkflowEngine::new()),
        sessions: Arc::new(SessionManager::new(max_age, StdDuration::from_millis(20))),
        events: Arc::new(KvEventStore::new(Arc::new(MemoryKv::new()))),
    })
}

async fn initialize(state: Arc<HttpTransportState>) -> String {
    let request = Request::post("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(json!({"jsonrpc":"2.0","method":"initialize","id":1,"params":{}}).to_string()))
        .unwrap();
    let response = routes(state).oneshot(request).await.unwrap();
    response.headers().get("mcp-session-id").unwrap().to_str().unwrap().to_string()
}

#[tokio::test]
async fn expired_session_get_reports_gone_then_reinitializing_recovers() {
    let state = build_state(chrono::Duration::milliseconds(10));
    let session_id = initialize(state.clone()).await;

    tokio::time::sleep(StdDuration::from_millis(60)).await;

    let get_request = Request::get("/mcp").header("mcp-session-id", session_id).body(Body::empty()).unwrap();
    let get_response = routes(state).oneshot(get_request).await.unwrap();
    assert_eq!(get_response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn delete_is_idempotent_and_post_against_deleted_session_is_rejected() {
    let state = build_state(chrono::Duration::minutes(30));
    let session_id = initialize(state.clone()).await;

    let first_delete = Request::delete("/mcp").header("mcp-session-id", session_id.clone()).body(Body::empty()).unwrap();
    let first_response = routes(state.clone()).oneshot(first_delete).await.unwrap();
    assert_eq!(first_response.status(), StatusCode::NO_CONTENT);

    let second_delete = Request::delete("/mcp").header("mcp-session-id", session_id.clone()).body(Body::empty()).unwrap();
    let second_response = routes(state.clone()).oneshot(second_delete).await.unwrap();
    assert_eq!(second_response.status(), StatusCode::NO_CONTENT);

    let post_after_delete = Request::post("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", session_id)
        .body(Body::from(
            json!({"jsonrpc":"2.0","method":"tools/call","id":2,"params":{"name":"echo","arguments":{}}}).to_string(),
        ))
        .unwrap();
    let post_response = routes(state).oneshot(post_after_delete).await.unwrap();
    assert_eq!(post_response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_without_session_header_is_bad_request() {
    let state = build_state(chrono::Duration::minutes(30));
    let request = Request::get("/mcp").body(Body::empty()).unwrap();
    let response = routes(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
