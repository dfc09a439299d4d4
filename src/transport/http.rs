//! HTTP Transport — Streamable HTTP per MCP 2025-03-26: a single `/mcp`
//! endpoint handling POST (JSON-RPC request/response), GET (SSE event
//! stream, resumable via `Last-Event-ID`), and DELETE (session teardown).
//!
//! Grounded on the teacher's `mcp/server.rs::serve_http`, with the `rmcp`
//! `StreamableHttpService`/`LocalSessionManager` it depends on replaced by
//! this crate's own `SessionManager` and chunked `EventStore` (spec.md
//! §4.2/§4.7) — session lifecycle and SSE replay are protocol state this
//! crate owns directly rather than delegating to the SDK.

use crate::auth::request_context::RequestContext;
use crate::constants::{
    DEFAULT_SSE_KEEPALIVE_SECS, HEADER_LAST_EVENT_ID, HEADER_MCP_SESSION_ID, HTTP_PATH_MCP,
};
use crate::event::{EventStore, StoredEvent};
use crate::registry::tools::{ToolInvocationExtra, ToolRegistry};
use crate::registry::workflows::WorkflowEngine;
use crate::session::{SessionLookup, SessionManager, Transport};
use crate::transport::router::ApiError;
use crate::{McpError, Result};
use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpTransportState {
    pub tools: Arc<ToolRegistry>,
    pub workflows: Arc<WorkflowEngine>,
    pub sessions: Arc<SessionManager>,
    pub events: Arc<dyn EventStore>,
}

pub fn routes(state: Arc<HttpTransportState>) -> Router {
    Router::new()
        .route(
            HTTP_PATH_MCP,
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .with_state(state)
}

#[derive(Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct JsonRpcSuccess {
    jsonrpc: &'static str,
    id: Value,
    result: Value,
}

fn success_response(id: Value, result: Value) -> Response {
    Json(JsonRpcSuccess { jsonrpc: "2.0", id, result }).into_response()
}

fn session_status(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "jsonrpc": "2.0", "error": { "code": -32000, "message": message }, "id": Value::Null })),
    )
        .into_response()
}

fn parse_error_response(e: serde_json::Error) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "jsonrpc": "2.0",
            "error": { "code": -32700, "message": format!("parse error: {e}") },
            "id": Value::Null,
        })),
    )
        .into_response()
}

async fn handle_post(
    State(state): State<Arc<HttpTransportState>>,
    headers: HeaderMap,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let req: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return parse_error_response(e),
    };

    if req.method == "initialize" {
        let session = state.sessions.create_session(Transport::Http);
        let result = json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mcpforge", "version": env!("CARGO_PKG_VERSION") },
        });
        let mut response = success_response(req.id.unwrap_or(Value::Null), result);
        if let Ok(v) = HeaderValue::from_str(&session.id) {
            response.headers_mut().insert(HEADER_MCP_SESSION_ID, v);
        }
        return response;
    }

    if !req.method.starts_with("notifications/") {
        let Some(session_id) = headers.get(HEADER_MCP_SESSION_ID).and_then(|v| v.to_str().ok()) else {
            return session_status(StatusCode::BAD_REQUEST, "Mcp-Session-Id header required");
        };
        match state.sessions.validate(session_id, Transport::Http).await {
            SessionLookup::Active(_) => {}
            SessionLookup::Expired => return session_status(StatusCode::GONE, "session expired, re-initialize"),
            SessionLookup::Unknown => return session_status(StatusCode::NOT_FOUND, "unknown session"),
        }
    }

    let Some(id) = req.id else {
        // Notification: no response object per JSON-RPC; run to completion
        // in the background and acknowledge immediately.
        let state = state.clone();
        let method = req.method;
        let params = req.params;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatch(&state, &method, params, &ctx).await {
                tracing::warn!(error = %e, method = %method, "notification handling failed");
            }
        });
        return StatusCode::ACCEPTED.into_response();
    };

    match dispatch(&state, &req.method, req.params, &ctx).await {
        Ok(result) => success_response(id, result),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn dispatch(state: &HttpTransportState, method: &str, params: Value, ctx: &RequestContext) -> Result<Value> {
    match method {
        "tools/list" => {
            let tools: Vec<Value> = state
                .tools
                .list_tools()
                .into_iter()
                .map(|t| json!({ "name": t.name, "description": t.description, "inputSchema": t.input_schema }))
                .collect();
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => {
            let name = params
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| McpError::validation_field("name", "tools/call requires a name"))?;
            let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let extra = ToolInvocationExtra { request_id: ctx.request_id.clone() };
            let result = state.tools.invoke_tool(name, args, extra).await?;
            Ok(json!({
                "content": result.content.iter().map(|c| json!({ "type": "text", "text": c.text })).collect::<Vec<_>>(),
                "isError": result.is_error,
            }))
        }
        "workflows/execute" => {
            let name = params
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| McpError::validation_field("name", "workflows/execute requires a name"))?;
            let workflow_params = params.get("parameters").cloned().unwrap_or_else(|| json!({}));
            let result = state.workflows.execute_with_validation(name, workflow_params).await?;
            Ok(serde_json::to_value(result)?)
        }
        "ping" => Ok(json!({})),
        other => Err(McpError::mcp(format!("unknown method: {other}"))),
    }
}

struct SseState {
    events: Arc<dyn EventStore>,
    stream_id: String,
    after: Option<u64>,
    pending: VecDeque<StoredEvent>,
    quiet_for: Duration,
}

fn sse_event(ev: &StoredEvent) -> Event {
    Event::default()
        .id(ev.id.to_string())
        .event(ev.kind.clone())
        .data(String::from_utf8_lossy(&ev.payload).into_owned())
}

async fn handle_get(State(state): State<Arc<HttpTransportState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(HEADER_MCP_SESSION_ID).and_then(|v| v.to_str().ok()) else {
        return session_status(StatusCode::BAD_REQUEST, "Mcp-Session-Id header required");
    };
    match state.sessions.validate(session_id, Transport::Http).await {
        SessionLookup::Active(_) => {}
        SessionLookup::Expired => return session_status(StatusCode::GONE, "session expired, re-initialize"),
        SessionLookup::Unknown => return session_status(StatusCode::NOT_FOUND, "unknown session"),
    }

    let after = headers
        .get(HEADER_LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    // A `Last-Event-ID` past the highest id we ever assigned can't be
    // replayed from; treat it the same as an expired session rather than
    // blocking forever waiting for it to exist.
    if let Some(requested) = after {
        let last_known = state.events.last_event_id(session_id).await.unwrap_or(None);
        if last_known.is_none_or(|last| requested > last) {
            return session_status(StatusCode::GONE, "requested Last-Event-ID is beyond the known stream, re-initialize");
        }
    }

    let initial = SseState {
        events: Arc::clone(&state.events),
        stream_id: session_id.to_string(),
        after,
        pending: VecDeque::new(),
        quiet_for: Duration::ZERO,
    };

    let stream = stream::unfold(initial, |mut st| async move {
        loop {
            if let Some(ev) = st.pending.pop_front() {
                st.after = Some(ev.id);
                st.quiet_for = Duration::ZERO;
                return Some((Ok::<Event, Infallible>(sse_event(&ev)), st));
            }
            if let Ok(new_events) = st.events.replay(&st.stream_id, st.after).await {
                if !new_events.is_empty() {
                    st.pending.extend(new_events);
                    continue;
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            st.quiet_for += Duration::from_secs(1);
            if st.quiet_for >= Duration::from_secs(DEFAULT_SSE_KEEPALIVE_SECS) {
                st.quiet_for = Duration::ZERO;
                return Some((Ok(Event::default().comment("keepalive")), st));
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn handle_delete(State(state): State<Arc<HttpTransportState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(HEADER_MCP_SESSION_ID).and_then(|v| v.to_str().ok()) else {
        return session_status(StatusCode::BAD_REQUEST, "Mcp-Session-Id header required");
    };
    match state.sessions.delete(session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tools::{HandlerMode, ToolDefinition, ToolHandler, ToolResult};
    use crate::kv::MemoryKv;
    use crate::event::KvEventStore;
    use chrono::Duration as ChronoDuration;

    fn state() -> Arc<HttpTransportState> {
        Arc::new(HttpTransportState {
            tools: Arc::new(ToolRegistry::new()),
            workflows: Arc::new(WorkflowEngine::new()),
            sessions: Arc::new(SessionManager::new(ChronoDuration::minutes(30), std::time::Duration::from_secs(300))),
            events: Arc::new(KvEventStore::new(Arc::new(MemoryKv::new()))),
        })
    }

    fn sample_ctx() -> RequestContext {
        RequestContext::new(crate::auth::request_context::TransportKind::Http, "user-1", "client-1", vec![])
    }

    #[tokio::test]
    async fn dispatch_lists_registered_tools() {
        let st = state();
        st.tools
            .register_tool(
                ToolDefinition {
                    name: "echo".into(),
                    description: "echoes".into(),
                    input_schema: json!({"type": "object"}),
                    handler_mode: HandlerMode::Native,
                },
                Arc::new(|_args: Value, _extra: ToolInvocationExtra| async { Ok(ToolResult::ok("hi")) })
                    as Arc<dyn ToolHandler>,
            )
            .unwrap();

        let result = dispatch(&st, "tools/list", json!({}), &sample_ctx()).await.unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_method() {
        let st = state();
        assert!(dispatch(&st, "bogus/method", json!({}), &sample_ctx()).await.is_err());
    }

    #[tokio::test]
    async fn dispatch_calls_tool_and_wraps_content() {
        let st = state();
        st.tools
            .register_tool(
                ToolDefinition {
                    name: "echo".into(),
                    description: "echoes".into(),
                    input_schema: json!({"type": "object"}),
                    handler_mode: HandlerMode::Native,
                },
                Arc::new(|_args: Value, _extra: ToolInvocationExtra| async { Ok(ToolResult::ok("hi")) })
                    as Arc<dyn ToolHandler>,
            )
            .unwrap();

        let result = dispatch(&st, "tools/call", json!({"name": "echo", "arguments": {}}), &sample_ctx())
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
        assert_eq!(result["isError"], false);
    }
}
