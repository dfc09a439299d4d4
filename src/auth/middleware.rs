//! Authentication middleware — path-based allowlisting, bearer-token
//! validation against the MCP server's own `TokenStore`, and the
//! `WWW-Authenticate` challenge construction RFC 6750/9728 expect.
//!
//! Grounded on the teacher's `auth/middleware.rs` (bearer extraction, scope
//! validators, sliding-window rate limiter), rebuilt against `TokenStore`
//! instead of the teacher's `Storage`/`OAuthToken`, and extended with the
//! explicit per-transport allowlist spec.md §4.6 requires instead of the
//! teacher's single no-op passthrough.

use crate::auth::client::OAuthConsumer;
use crate::auth::request_context::{RequestContext, TransportKind};
use crate::auth::tokens::TokenStore;
use crate::constants::{
    HEADER_WWW_AUTHENTICATE, HTTP_PATH_AUTHORIZE, HTTP_PATH_CALLBACK, HTTP_PATH_HEALTH,
    HTTP_PATH_REGISTER, HTTP_PATH_STATUS, HTTP_PATH_TOKEN, HTTP_PATH_WELL_KNOWN_AS,
    HTTP_PATH_WELL_KNOWN_PROTECTED_RESOURCE, MCP_ACTION_THIRD_PARTY_TOKEN_REFRESHED,
    MCP_ERR_THIRD_PARTY_REAUTH_REQUIRED, MCP_ERR_TOKEN_EXPIRED,
};
use crate::{McpError, Result};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime};

/// Paths that never require authentication, regardless of transport.
const PUBLIC_PATHS: &[&str] = &[
    HTTP_PATH_STATUS,
    HTTP_PATH_HEALTH,
    HTTP_PATH_REGISTER,
    HTTP_PATH_AUTHORIZE,
    HTTP_PATH_TOKEN,
    HTTP_PATH_CALLBACK,
    HTTP_PATH_WELL_KNOWN_AS,
    HTTP_PATH_WELL_KNOWN_PROTECTED_RESOURCE,
];

fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || path.starts_with("/.well-known/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    Required,
    Disabled,
}

/// Per-transport default: HTTP requires a bearer token on `/mcp` unless a
/// deployment opts out; STDIO has no network surface to authenticate.
pub fn default_requirement(transport: TransportKind) -> AuthRequirement {
    match transport {
        TransportKind::Http => AuthRequirement::Required,
        TransportKind::Stdio => AuthRequirement::Disabled,
    }
}

pub struct AuthMiddlewareState {
    pub tokens: Arc<TokenStore>,
    pub issuer: String,
    pub requirement: AuthRequirement,
    /// Present only when an upstream OAuth provider is configured; session
    /// binding (spec.md §4.6 step 3) is a no-op without one.
    pub consumer: Option<Arc<OAuthConsumer>>,
    pub session_binding_enabled: bool,
    rate_limiter: parking_lot::RwLock<std::collections::HashMap<String, Vec<SystemTime>>>,
    rate_limit_requests: usize,
    rate_limit_window: StdDuration,
}

impl AuthMiddlewareState {
    pub fn new(
        tokens: Arc<TokenStore>,
        issuer: String,
        requirement: AuthRequirement,
        consumer: Option<Arc<OAuthConsumer>>,
        session_binding_enabled: bool,
    ) -> Self {
        Self {
            tokens,
            issuer,
            requirement,
            consumer,
            session_binding_enabled,
            rate_limiter: parking_lot::RwLock::new(std::collections::HashMap::new()),
            rate_limit_requests: 120,
            rate_limit_window: StdDuration::from_secs(60),
        }
    }

    fn www_authenticate(&self, error: &str) -> String {
        format!(
            "Bearer realm=\"mcp\", authorization_uri=\"{}{}\", registration_uri=\"{}{}\", error=\"{}\"",
            self.issuer, HTTP_PATH_AUTHORIZE, self.issuer, HTTP_PATH_REGISTER, error
        )
    }

    fn check_rate_limit(&self, key: &str) -> bool {
        let now = SystemTime::now();
        let mut limiter = self.rate_limiter.write();
        let entry = limiter.entry(key.to_string()).or_default();
        entry.retain(|&t| now.duration_since(t).unwrap_or_default() < self.rate_limit_window);
        if entry.len() >= self.rate_limit_requests {
            return false;
        }
        entry.push(now);
        true
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
}

async fn validate_bearer(state: &AuthMiddlewareState, token: &str) -> Result<(String, String, Vec<String>)> {
    let access = state
        .tokens
        .get_access_token(token)
        .await?
        .ok_or_else(|| McpError::authentication("invalid_token", "access token not recognized"))?;
    if access.expires_at < chrono::Utc::now() {
        return Err(McpError::authentication(MCP_ERR_TOKEN_EXPIRED, "access token expired"));
    }
    let scopes = access.scope.split_whitespace().map(String::from).collect();
    Ok((access.user_id, access.client_id, scopes))
}

/// Axum middleware entry point. Builds a `RequestContext` on success and
/// inserts it into request extensions for downstream extraction.
pub async fn authenticate(
    State(state): State<Arc<AuthMiddlewareState>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if is_public_path(&path) {
        return next.run(request).await;
    }

    if state.requirement == AuthRequirement::Disabled {
        let ctx = RequestContext::new(TransportKind::Stdio, "anonymous", "local", vec![]);
        request.extensions_mut().insert(ctx);
        return next.run(request).await;
    }

    let rate_limit_key = extract_bearer_token(request.headers())
        .unwrap_or_else(|| "anonymous".to_string());
    if !state.check_rate_limit(&rate_limit_key) {
        return too_many_requests();
    }

    let Some(token) = extract_bearer_token(request.headers()) else {
        return challenge(&state, StatusCode::UNAUTHORIZED, "invalid_request");
    };

    match validate_bearer(&state, &token).await {
        Ok((user_id, client_id, scopes)) => {
            let mut ctx = RequestContext::new(TransportKind::Http, user_id.clone(), client_id, scopes);

            if state.session_binding_enabled
                && let Some(consumer) = &state.consumer
            {
                let will_refresh = consumer.upstream_needs_refresh(&user_id).await.unwrap_or(false);
                match consumer.get_access_token(&user_id).await {
                    Ok(_) if will_refresh => {
                        tracing::info!(user_id, action = MCP_ACTION_THIRD_PARTY_TOKEN_REFRESHED, "upstream token refreshed");
                        ctx = ctx.with_action_taken(MCP_ACTION_THIRD_PARTY_TOKEN_REFRESHED);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(user_id, error = %e, "upstream reauthorization required");
                        return third_party_reauth_required();
                    }
                }
            }

            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(McpError::Authentication { error_code, .. }) => {
            challenge(&state, StatusCode::UNAUTHORIZED, error_code)
        }
        Err(_) => challenge(&state, StatusCode::UNAUTHORIZED, "invalid_token"),
    }
}

fn challenge(state: &AuthMiddlewareState, status: StatusCode, error: &str) -> Response {
    let mut response = status.into_response();
    if let Ok(value) = HeaderValue::from_str(&state.www_authenticate(error)) {
        response.headers_mut().insert(HEADER_WWW_AUTHENTICATE, value);
    }
    response
}

fn third_party_reauth_required() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": MCP_ERR_THIRD_PARTY_REAUTH_REQUIRED })),
    )
        .into_response()
}

fn too_many_requests() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response()
}

pub fn has_scope(scopes: &[String], scope: &str) -> bool {
    scopes.iter().any(|s| s == scope)
}

pub fn has_any_scope(scopes: &[String], required: &[&str]) -> bool {
    required.iter().any(|r| has_scope(scopes, r))
}

pub fn has_all_scopes(scopes: &[String], required: &[&str]) -> bool {
    required.iter().all(|r| has_scope(scopes, r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_bypass_auth() {
        assert!(is_public_path("/status"));
        assert!(is_public_path("/.well-known/oauth-authorization-server"));
        assert!(!is_public_path("/mcp"));
    }

    #[test]
    fn scope_helpers() {
        let scopes = vec!["read".to_string(), "write".to_string()];
        assert!(has_any_scope(&scopes, &["read", "admin"]));
        assert!(has_all_scopes(&scopes, &["read", "write"]));
        assert!(!has_all_scopes(&scopes, &["read", "admin"]));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn default_requirement_per_transport() {
        assert_eq!(default_requirement(TransportKind::Http), AuthRequirement::Required);
        assert_eq!(default_requirement(TransportKind::Stdio), AuthRequirement::Disabled);
    }
}
