//! Refresh-token rotation against the `/token` endpoint (spec.md §8
//! scenario 2): a successful refresh invalidates the refresh token before
//! returning the new pair, and reusing it afterward fails.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use mcpforge::auth::clients::ClientRegistry;
use mcpforge::auth::client::{OAuthConsumer, UpstreamProviderConfig};
use mcpforge::auth::credentials::CredentialStore;
use mcpforge::auth::server::{create_oauth_routes, OAuthServerConfig, OAuthServerState};
use mcpforge::auth::tokens::TokenStore;
use mcpforge::kv::MemoryKv;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn unused_consumer() -> Arc<OAuthConsumer> {
    let credentials = Arc::new(CredentialStore::new(Arc::new(MemoryKv::new())));
    Arc::new(
        OAuthConsumer::new(
            UpstreamProviderConfig {
                provider_id: "upstream".into(),
                client_id: "upstream-client".into(),
                client_secret: "upstream-secret".into(),
                auth_url: "https://upstream.example/authorize".into(),
                token_url: "https://upstream.example/token".into(),
                redirect_uri: "https://mcp.example/callback".into(),
                scopes: vec!["read".into()],
                userinfo_url: "https://upstream.example/userinfo".into(),
            },
            credentials,
        )
        .unwrap(),
    )
}

fn oauth_state() -> Arc<OAuthServerState> {
    let kv = Arc::new(MemoryKv::new());
    Arc::new(OAuthServerState {
        config: OAuthServerConfig { issuer: "https://mcp.example".into(), require_pkce: true, allow_loopback_redirects: true },
        clients: Arc::new(ClientRegistry::new(kv.clone())),
        tokens: Arc::new(TokenStore::new(kv.clone())),
        consumer: Some(unused_consumer()),
        kv,
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn rotating_a_refresh_token_invalidates_it() {
    let state = oauth_state();
    let refresh = state
        .tokens
        .issue_refresh_token("client-1".into(), "user-1".into(), "mcp".into(), Duration::days(30))
        .await
        .unwrap();

    let first = Request::post("/token")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!("grant_type=refresh_token&refresh_token={}&client_id=client-1", refresh.token)))
        .unwrap();
    let first_response = create_oauth_routes(state.clone()).oneshot(first).await.unwrap();
    assert_eq!(first_response.status(), StatusCode::OK);
    let first_body = body_json(first_response).await;
    assert!(first_body["access_token"].is_string());
    let new_refresh = first_body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, refresh.token);

    let reuse = Request::post("/token")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!("grant_type=refresh_token&refresh_token={}&client_id=client-1", refresh.token)))
        .unwrap();
    let reuse_response = create_oauth_routes(state).oneshot(reuse).await.unwrap();
    assert_eq!(reuse_response.status(), StatusCode::BAD_REQUEST);
    let reuse_body = body_json(reuse_response).await;
    assert_eq!(reuse_body["error"], "invalid_grant");
}

#[tokio::test]
async fn unknown_refresh_token_is_invalid_grant() {
    let state = oauth_state();
    let request = Request::post("/token")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("grant_type=refresh_token&refresh_token=bogus&client_id=client-1"))
        .unwrap();
    let response = create_oauth_routes(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}
