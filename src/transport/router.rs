//! HTTP Router — assembles the OAuth Authorization Server, MCP transport,
//! and well-known/status endpoints into one `axum::Router`, and renders
//! every `McpError` as the JSON-RPC-shaped error envelope spec clients
//! expect on any endpoint.
//!
//! Grounded on the teacher's `http/mod.rs` `ServiceBuilder`/`tower_http`
//! layer stacking (CORS + `TraceLayer`) and its `AppError`-wraps-a-domain-
//! error `IntoResponse` pattern, rebuilt against `McpError`'s taxonomy
//! (spec.md §7) instead of the teacher's `BeemFlowError`.

use crate::auth::middleware::{self, AuthMiddlewareState};
use crate::auth::server::{OAuthServerState, create_oauth_routes};
use crate::constants::{
    HEADER_RETRY_AFTER, HEADER_WWW_AUTHENTICATE, HTTP_PATH_HEALTH, HTTP_PATH_METRICS, HTTP_PATH_STATUS,
};
use crate::transport::http::HttpTransportState;
use crate::McpError;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

/// Wraps an `McpError` so it can be returned directly from an axum handler;
/// `IntoResponse` renders the JSON-RPC error envelope and status code.
pub struct ApiError(pub McpError);

impl From<McpError> for ApiError {
    fn from(e: McpError) -> Self {
        ApiError(e)
    }
}

fn status_for(error: &McpError) -> StatusCode {
    match error {
        McpError::Validation { .. } => StatusCode::BAD_REQUEST,
        McpError::Authentication { .. } => StatusCode::UNAUTHORIZED,
        McpError::Authorization { .. } => StatusCode::FORBIDDEN,
        McpError::NotFound { .. } => StatusCode::NOT_FOUND,
        McpError::Expired { .. } => StatusCode::GONE,
        McpError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        McpError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        McpError::ApiError { status, recoverable, .. } => {
            if *recoverable {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            } else {
                StatusCode::BAD_GATEWAY
            }
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_code_for(error: &McpError) -> Option<&'static str> {
    match error {
        McpError::Authentication { error_code, .. } => Some(error_code),
        McpError::Authorization { error_code } => Some(error_code),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = status_for(&error);
        if matches!(error, McpError::System(_) | McpError::Storage(_) | McpError::Io(_)) {
            tracing::error!(error = %error, "unhandled system error");
        }

        let mut body = json!({
            "code": -32000,
            "message": error.to_string(),
            "status": status.as_u16(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(code) = error_code_for(&error) {
            body["errorCode"] = Value::from(code);
        }
        if let McpError::RateLimited { retry_after_secs } = &error {
            body["guidance"] = Value::from(format!("retry after {retry_after_secs}s"));
        }

        let envelope = json!({ "jsonrpc": "2.0", "error": body, "id": Value::Null });
        let mut response = (status, Json(envelope)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(v) = HeaderValue::from_str("Bearer realm=\"mcp\"") {
                response.headers_mut().insert(HEADER_WWW_AUTHENTICATE, v);
            }
        }
        if let McpError::RateLimited { retry_after_secs } = &error {
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(HEADER_RETRY_AFTER, v);
            }
        }
        response
    }
}

async fn status_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics_handler() -> Response {
    match crate::telemetry::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

pub struct RouterConfig {
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

/// Builds the full application router: OAuth endpoints (public), MCP
/// transport endpoints (auth-gated per `AuthMiddlewareState`), and
/// status/health (public).
pub fn build_router(
    config: RouterConfig,
    oauth_state: Arc<OAuthServerState>,
    http_state: Arc<HttpTransportState>,
    auth_state: Arc<AuthMiddlewareState>,
) -> Router {
    let mcp_routes = crate::transport::http::routes(http_state).layer(
        axum::middleware::from_fn_with_state(auth_state, middleware::authenticate),
    );

    let mut router = Router::new()
        .merge(create_oauth_routes(oauth_state))
        .merge(mcp_routes)
        .route(HTTP_PATH_STATUS, get(status_handler))
        .route(HTTP_PATH_HEALTH, get(health_handler))
        .route(HTTP_PATH_METRICS, get(metrics_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new().latency_unit(LatencyUnit::Millis)),
        );

    if config.cors_enabled {
        let cors = if config.cors_origins.iter().any(|o| o == "*") {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        };
        router = router.layer(cors);
    }

    router
}
