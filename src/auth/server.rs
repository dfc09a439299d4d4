//! OAuth 2.1 Authorization Server — the MCP server's own authorize/token/
//! register/callback/metadata endpoints.
//!
//! Grounded on the teacher's `auth/server.rs` (route layout, RFC 7009/7662
//! revoke+introspect handlers, `generate_*` token helpers), rebuilt so the
//! `/authorize` flow bridges to the configured upstream provider via
//! `OAuthConsumer` instead of rendering an in-process HTML consent screen —
//! this server delegates "who is the user" to the upstream provider and
//! only mints its own MCP-scoped tokens after that round-trip completes
//! (spec.md §4.4's `/callback` step). PKCE is enforced unconditionally,
//! unlike the teacher's opt-in verification.

use crate::auth::clients::ClientRegistry;
use crate::auth::client::OAuthConsumer;
use crate::auth::tokens::TokenStore;
use crate::constants::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_AUTH_CODE_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_SECS,
    KV_PREFIX_OAUTH_MCP_AUTH_REQUESTS, OAUTH_ERR_INVALID_CLIENT, OAUTH_ERR_INVALID_GRANT,
    OAUTH_ERR_INVALID_REQUEST, OAUTH_ERR_UNSUPPORTED_GRANT_TYPE,
};
use crate::kv::{KvStore, key};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use base64::Engine;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

#[derive(Clone)]
pub struct OAuthServerConfig {
    pub issuer: String,
    pub require_pkce: bool,
    pub allow_loopback_redirects: bool,
}

impl Default for OAuthServerConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:3330".to_string(),
            require_pkce: true,
            allow_loopback_redirects: true,
        }
    }
}

pub struct OAuthServerState {
    pub config: OAuthServerConfig,
    pub clients: Arc<ClientRegistry>,
    pub tokens: Arc<TokenStore>,
    /// Absent for a bare MCP authorization server with no upstream identity
    /// provider to bridge to; `handle_authorize` mints a code directly in
    /// that case instead of redirecting out.
    pub consumer: Option<Arc<OAuthConsumer>>,
    pub kv: Arc<dyn KvStore>,
}

/// A pending authorization request, parked under a server-generated state
/// while the user round-trips through the upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingAuthRequest {
    client_id: String,
    redirect_uri: String,
    scope: String,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    original_state: Option<String>,
}

fn pending_key(state: &str) -> crate::kv::Key {
    key(&[KV_PREFIX_OAUTH_MCP_AUTH_REQUESTS, state])
}

pub fn create_oauth_routes(state: Arc<OAuthServerState>) -> Router {
    Router::new()
        .route(crate::constants::HTTP_PATH_WELL_KNOWN_AS, get(handle_metadata_discovery))
        .route(
            crate::constants::HTTP_PATH_WELL_KNOWN_PROTECTED_RESOURCE,
            get(handle_protected_resource_metadata),
        )
        .route(crate::constants::HTTP_PATH_REGISTER, post(handle_client_registration))
        .route(crate::constants::HTTP_PATH_AUTHORIZE, get(handle_authorize))
        .route(crate::constants::HTTP_PATH_CALLBACK, get(handle_callback))
        .route(crate::constants::HTTP_PATH_TOKEN, post(handle_token))
        .route("/oauth/revoke", post(handle_token_revocation))
        .route("/oauth/introspect", post(handle_token_introspection))
        .with_state(state)
}

async fn handle_metadata_discovery(State(state): State<Arc<OAuthServerState>>) -> impl IntoResponse {
    let issuer = &state.config.issuer;
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}{}", crate::constants::HTTP_PATH_AUTHORIZE),
        "token_endpoint": format!("{issuer}{}", crate::constants::HTTP_PATH_TOKEN),
        "registration_endpoint": format!("{issuer}{}", crate::constants::HTTP_PATH_REGISTER),
        "revocation_endpoint": format!("{issuer}/oauth/revoke"),
        "introspection_endpoint": format!("{issuer}/oauth/introspect"),
        "code_challenge_methods_supported": ["S256"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "response_types_supported": ["code"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post"],
    }))
}

async fn handle_protected_resource_metadata(
    State(state): State<Arc<OAuthServerState>>,
) -> impl IntoResponse {
    let issuer = &state.config.issuer;
    Json(json!({
        "resource": format!("{issuer}{}", crate::constants::HTTP_PATH_MCP),
        "authorization_servers": [issuer],
        "bearer_methods_supported": ["header"],
    }))
}

#[derive(Deserialize)]
struct ClientRegistrationRequest {
    client_name: String,
    redirect_uris: Vec<String>,
    #[serde(default)]
    grant_types: Vec<String>,
    #[serde(default)]
    response_types: Vec<String>,
    #[serde(default)]
    scope: String,
    client_uri: Option<String>,
    logo_uri: Option<String>,
    #[serde(default)]
    token_endpoint_auth_method: Option<String>,
}

async fn handle_client_registration(
    State(state): State<Arc<OAuthServerState>>,
    Json(req): Json<ClientRegistrationRequest>,
) -> Response {
    let confidential = req.token_endpoint_auth_method.as_deref() != Some("none");
    match state
        .clients
        .register(
            req.client_name,
            req.redirect_uris,
            req.grant_types,
            req.response_types,
            req.scope,
            req.client_uri,
            req.logo_uri,
            state.config.allow_loopback_redirects,
            confidential,
        )
        .await
    {
        Ok(client) => Json(json!({
            "client_id": client.client_id,
            "client_secret": client.client_secret,
            "client_name": client.client_name,
            "redirect_uris": client.redirect_uris,
            "grant_types": client.grant_types,
            "response_types": client.response_types,
            "token_endpoint_auth_method": client.token_endpoint_auth_method,
            "scope": client.scope,
        }))
        .into_response(),
        Err(e) => oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_REQUEST, &e),
    }
}

#[derive(Deserialize)]
struct AuthorizeQuery {
    response_type: String,
    client_id: String,
    redirect_uri: String,
    #[serde(default)]
    scope: String,
    state: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

async fn handle_authorize(
    State(state): State<Arc<OAuthServerState>>,
    Query(q): Query<AuthorizeQuery>,
) -> Response {
    if q.response_type != "code" {
        return redirect_with_error(&q.redirect_uri, q.state.as_deref(), OAUTH_ERR_INVALID_REQUEST);
    }
    let client = match state.clients.get(&q.client_id).await {
        Ok(Some(c)) => c,
        _ => return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_CLIENT, "unknown client_id"),
    };
    if !client.validate_redirect_uri(&q.redirect_uri) {
        return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_REQUEST, "redirect_uri mismatch");
    }
    if state.config.require_pkce && q.code_challenge.is_none() {
        return redirect_with_error(&q.redirect_uri, q.state.as_deref(), OAUTH_ERR_INVALID_REQUEST);
    }

    let Some(consumer) = state.consumer.clone() else {
        return mint_direct_code(&state, q).await;
    };

    let internal_state = Uuid::new_v4().to_string();
    let pending = PendingAuthRequest {
        client_id: q.client_id,
        redirect_uri: q.redirect_uri,
        scope: q.scope,
        code_challenge: q.code_challenge,
        code_challenge_method: q.code_challenge_method,
        original_state: q.state,
    };
    if let Err(e) = state
        .kv
        .set(&pending_key(&internal_state), match serde_json::to_vec(&pending) {
            Ok(v) => v,
            Err(e) => return oauth_error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, OAUTH_ERR_INVALID_REQUEST, &e.to_string()),
        }, Some(Duration::minutes(10)))
        .await
    {
        return oauth_error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, OAUTH_ERR_INVALID_REQUEST, &e.to_string());
    }

    match consumer.get_authorize_url(&internal_state) {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => oauth_error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, OAUTH_ERR_INVALID_REQUEST, &e),
    }
}

/// No upstream provider configured: mint an MCP authorization code directly
/// against a fresh per-grant identity, skipping the upstream round-trip
/// `handle_callback` otherwise performs.
async fn mint_direct_code(state: &Arc<OAuthServerState>, q: AuthorizeQuery) -> Response {
    let user_id = format!("direct:{}", Uuid::new_v4());
    let mcp_code = match state
        .tokens
        .issue_code(
            q.client_id,
            user_id,
            q.redirect_uri.clone(),
            q.scope,
            q.code_challenge,
            q.code_challenge_method,
            Duration::seconds(DEFAULT_AUTH_CODE_TTL_SECS),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return redirect_with_error(&q.redirect_uri, q.state.as_deref(), &e.to_string()),
    };

    let mut redirect_url = url::Url::parse(&q.redirect_uri)
        .unwrap_or_else(|_| url::Url::parse("http://localhost/").unwrap());
    redirect_url.query_pairs_mut().append_pair("code", &mcp_code.code);
    if let Some(s) = q.state {
        redirect_url.query_pairs_mut().append_pair("state", &s);
    }
    Redirect::temporary(redirect_url.as_str()).into_response()
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

async fn handle_callback(
    State(state): State<Arc<OAuthServerState>>,
    Query(q): Query<CallbackQuery>,
) -> Response {
    let pending_raw = match state.kv.get(&pending_key(&q.state)).await {
        Ok(Some(raw)) => raw,
        _ => return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_REQUEST, "unknown or expired authorization request"),
    };
    let _ = state.kv.delete(&pending_key(&q.state)).await;
    let pending: PendingAuthRequest = match serde_json::from_slice(&pending_raw) {
        Ok(p) => p,
        Err(e) => return oauth_error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, OAUTH_ERR_INVALID_REQUEST, &e.to_string()),
    };

    let Some(consumer) = &state.consumer else {
        return oauth_error_response(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            OAUTH_ERR_INVALID_REQUEST,
            "no upstream provider configured",
        );
    };
    let exchanged = match consumer.exchange_code_for_tokens("pending", &q.code, &q.state).await {
        Ok(tokens) => tokens,
        Err(e) => return redirect_with_error(&pending.redirect_uri, pending.original_state.as_deref(), &e.to_string()),
    };
    let user_id = exchanged.subject.clone();
    if let Err(e) = consumer.rekey_credential("pending", &user_id).await {
        return redirect_with_error(&pending.redirect_uri, pending.original_state.as_deref(), &e.to_string());
    }

    let mcp_code = match state
        .tokens
        .issue_code(
            pending.client_id,
            user_id,
            pending.redirect_uri.clone(),
            pending.scope,
            pending.code_challenge,
            pending.code_challenge_method,
            Duration::seconds(DEFAULT_AUTH_CODE_TTL_SECS),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return redirect_with_error(&pending.redirect_uri, pending.original_state.as_deref(), &e.to_string()),
    };

    let mut redirect_url = url::Url::parse(&pending.redirect_uri)
        .unwrap_or_else(|_| url::Url::parse("http://localhost/").unwrap());
    redirect_url.query_pairs_mut().append_pair("code", &mcp_code.code);
    if let Some(s) = pending.original_state {
        redirect_url.query_pairs_mut().append_pair("state", &s);
    }
    Redirect::temporary(redirect_url.as_str()).into_response()
}

#[derive(Deserialize)]
struct TokenRequest {
    grant_type: String,
    code: Option<String>,
    redirect_uri: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

async fn handle_token(State(state): State<Arc<OAuthServerState>>, Form(req): Form<TokenRequest>) -> Response {
    match req.grant_type.as_str() {
        "authorization_code" => handle_authorization_code_grant(state, req).await,
        "refresh_token" => handle_refresh_token_grant(state, req).await,
        other => oauth_error_response(
            axum::http::StatusCode::BAD_REQUEST,
            OAUTH_ERR_UNSUPPORTED_GRANT_TYPE,
            &format!("unsupported grant_type: {other}"),
        ),
    }
}

fn verify_pkce(code_challenge: &str, method: Option<&str>, verifier: &str) -> bool {
    if method.unwrap_or("S256") != "S256" {
        return false;
    }
    let digest = Sha256::digest(verifier.as_bytes());
    let computed = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}

async fn handle_authorization_code_grant(state: Arc<OAuthServerState>, req: TokenRequest) -> Response {
    let Some(code) = req.code else {
        return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_REQUEST, "code is required");
    };
    let entry = match state.tokens.consume_code(&code).await {
        Ok(Some(e)) => e,
        Ok(None) => return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_GRANT, "code already used or expired"),
        Err(e) => return oauth_error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, OAUTH_ERR_INVALID_GRANT, &e.to_string()),
    };

    if req.redirect_uri.as_deref() != Some(entry.redirect_uri.as_str()) {
        return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_GRANT, "redirect_uri mismatch");
    }
    if let Some(challenge) = &entry.code_challenge {
        let Some(verifier) = req.code_verifier.as_deref() else {
            return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_GRANT, "code_verifier is required");
        };
        if !verify_pkce(challenge, entry.code_challenge_method.as_deref(), verifier) {
            return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_GRANT, "PKCE verification failed");
        }
    } else if state.config.require_pkce {
        return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_GRANT, "PKCE required");
    }

    issue_token_pair(&state, entry.client_id, entry.user_id, entry.scope).await
}

async fn handle_refresh_token_grant(state: Arc<OAuthServerState>, req: TokenRequest) -> Response {
    let Some(token) = req.refresh_token else {
        return oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_REQUEST, "refresh_token is required");
    };
    match state.tokens.rotate_refresh_token(&token).await {
        Ok(Some(entry)) => issue_token_pair(&state, entry.client_id, entry.user_id, entry.scope).await,
        Ok(None) => oauth_error_response(axum::http::StatusCode::BAD_REQUEST, OAUTH_ERR_INVALID_GRANT, "refresh token invalid or already used"),
        Err(e) => oauth_error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, OAUTH_ERR_INVALID_GRANT, &e.to_string()),
    }
}

async fn issue_token_pair(state: &Arc<OAuthServerState>, client_id: String, user_id: String, scope: String) -> Response {
    let access = match state
        .tokens
        .issue_access_token(client_id.clone(), user_id.clone(), scope.clone(), Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS))
        .await
    {
        Ok(t) => t,
        Err(e) => return oauth_error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, OAUTH_ERR_INVALID_GRANT, &e.to_string()),
    };
    let refresh = match state
        .tokens
        .issue_refresh_token(client_id, user_id, scope, Duration::seconds(DEFAULT_REFRESH_TOKEN_TTL_SECS))
        .await
    {
        Ok(t) => t,
        Err(e) => return oauth_error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, OAUTH_ERR_INVALID_GRANT, &e.to_string()),
    };

    Json(json!({
        "access_token": access.token,
        "token_type": "Bearer",
        "expires_in": DEFAULT_ACCESS_TOKEN_TTL_SECS,
        "refresh_token": refresh.token,
        "scope": access.scope,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct RevocationRequest {
    token: String,
}

async fn handle_token_revocation(
    State(state): State<Arc<OAuthServerState>>,
    Form(req): Form<RevocationRequest>,
) -> impl IntoResponse {
    let _ = state.tokens.revoke_access_token(&req.token).await;
    let _ = state.tokens.revoke_refresh_token(&req.token).await;
    axum::http::StatusCode::OK
}

#[derive(Deserialize)]
struct IntrospectionRequest {
    token: String,
}

async fn handle_token_introspection(
    State(state): State<Arc<OAuthServerState>>,
    Form(req): Form<IntrospectionRequest>,
) -> impl IntoResponse {
    match state.tokens.get_access_token(&req.token).await {
        Ok(Some(t)) if t.expires_at > Utc::now() => Json(json!({
            "active": true,
            "client_id": t.client_id,
            "sub": t.user_id,
            "scope": t.scope,
            "exp": t.expires_at.timestamp(),
        })),
        _ => Json(json!({ "active": false })),
    }
}

fn oauth_error_response(status: axum::http::StatusCode, error: &str, description: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": error, "error_description": description.to_string() }))).into_response()
}

fn redirect_with_error(redirect_uri: &str, original_state: Option<&str>, error: &str) -> Response {
    match url::Url::parse(redirect_uri) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("error", error);
            if let Some(s) = original_state {
                url.query_pairs_mut().append_pair("state", s);
            }
            Redirect::temporary(url.as_str()).into_response()
        }
        Err(_) => oauth_error_response(axum::http::StatusCode::BAD_REQUEST, error, "invalid redirect_uri"),
    }
}
