//! PKCE enforcement across `/authorize` → `/callback` → `/token` (spec.md
//! §8 scenario 3). The upstream provider's token endpoint is mocked with
//! `wiremock` since `/callback` drives a real exchange against it.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use mcpforge::auth::client::{OAuthConsumer, UpstreamProviderConfig};
use mcpforge::auth::clients::ClientRegistry;
use mcpforge::auth::credentials::CredentialStore;
use mcpforge::auth::server::{create_oauth_routes, OAuthServerConfig, OAuthServerState};
use mcpforge::auth::tokens::TokenStore;
use mcpforge::kv::MemoryKv;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn oauth_state_with_mock_upstream(mock_server: &MockServer) -> Arc<OAuthServerState> {
    let kv = Arc::new(MemoryKv::new());
    let credentials = Arc::new(CredentialStore::new(Arc::new(MemoryKv::new())));
    let consumer = Arc::new(
        OAuthConsumer::new(
            UpstreamProviderConfig {
                provider_id: "upstream".into(),
                client_id: "upstream-client".into(),
                client_secret: "upstream-secret".into(),
                auth_url: format!("{}/authorize", mock_server.uri()),
                token_url: format!("{}/token", mock_server.uri()),
                redirect_uri: "https://mcp.example/callback".into(),
                scopes: vec!["read".into()],
                userinfo_url: format!("{}/userinfo", mock_server.uri()),
            },
            credentials,
        )
        .unwrap(),
    );
    Arc::new(OAuthServerState {
        config: OAuthServerConfig { issuer: "https://mcp.example".into(), require_pkce: true, allow_loopback_redirects: true },
        clients: Arc::new(ClientRegistry::new(kv.clone())),
        tokens: Arc::new(TokenStore::new(kv.clone())),
        consumer: Some(consumer),
        kv,
    })
}

async fn register_client(state: &Arc<OAuthServerState>) -> String {
    state
        .clients
        .register(
            "test client".into(),
            vec!["https://client.example/callback".into()],
            vec![],
            vec![],
            "mcp".into(),
            None,
            None,
            true,
            false,
        )
        .await
        .unwrap()
        .client_id
}

fn location_of(response: &axum::response::Response) -> String {
    response.headers().get("location").unwrap().to_str().unwrap().to_string()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn authorize_without_code_challenge_redirects_with_invalid_request() {
    let mock_server = MockServer::start().await;
    let state = oauth_state_with_mock_upstream(&mock_server).await;
    let client_id = register_client(&state).await;

    let request = Request::get(format!(
        "/authorize?response_type=code&client_id={client_id}&redirect_uri=https://client.example/callback&state=s1"
    ))
    .body(Body::empty())
    .unwrap();
    let response = create_oauth_routes(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = location_of(&response);
    assert!(location.starts_with("https://client.example/callback"));
    assert!(location.contains("error=invalid_request"));
    assert!(location.contains("state=s1"));
}

/// Drives `/authorize` → (mocked upstream) → `/callback` for `client_id`
/// bound to `challenge`, returning the minted MCP authorization code. Each
/// call consumes a fresh CSRF state, so distinct calls yield distinct codes
/// even against the same client.
async fn obtain_mcp_code(state: &Arc<OAuthServerState>, client_id: &str, run_state: &str, challenge: &str) -> String {
    let authorize_request = Request::get(format!(
        "/authorize?response_type=code&client_id={client_id}&redirect_uri=https://client.example/callback&state={run_state}&code_challenge={challenge}&code_challenge_method=S256"
    ))
    .body(Body::empty())
    .unwrap();
    let authorize_response = create_oauth_routes(state.clone()).oneshot(authorize_request).await.unwrap();
    assert_eq!(authorize_response.status(), StatusCode::TEMPORARY_REDIRECT);
    let upstream_redirect = location_of(&authorize_response);
    let internal_state = url::Url::parse(&upstream_redirect)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.to_string())
        .expect("consumer authorize url carries our csrf state");

    let callback_request = Request::get(format!("/callback?code=upstream-code&state={internal_state}"))
        .body(Body::empty())
        .unwrap();
    let callback_response = create_oauth_routes(state.clone()).oneshot(callback_request).await.unwrap();
    assert_eq!(callback_response.status(), StatusCode::TEMPORARY_REDIRECT);
    url::Url::parse(&location_of(&callback_response))
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .expect("callback mints an mcp authorization code")
}

#[tokio::test]
async fn matching_verifier_mints_tokens_wrong_verifier_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "upstream-access-token",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sub": "upstream-user-1" })))
        .mount(&mock_server)
        .await;

    let state = oauth_state_with_mock_upstream(&mock_server).await;
    let client_id = register_client(&state).await;

    let verifier = "a-fixed-code-verifier-that-is-long-enough";
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    let code_for_wrong_verifier = obtain_mcp_code(&state, &client_id, "s1", &challenge).await;
    let wrong_verifier_request = Request::post("/token")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "grant_type=authorization_code&code={code_for_wrong_verifier}&redirect_uri=https://client.example/callback&code_verifier=not-the-right-verifier"
        )))
        .unwrap();
    let wrong_verifier_response = create_oauth_routes(state.clone()).oneshot(wrong_verifier_request).await.unwrap();
    assert_eq!(wrong_verifier_response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(wrong_verifier_response).await["error"], "invalid_grant");

    let code_for_correct_verifier = obtain_mcp_code(&state, &client_id, "s2", &challenge).await;
    let token_request = Request::post("/token")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "grant_type=authorization_code&code={code_for_correct_verifier}&redirect_uri=https://client.example/callback&code_verifier={verifier}"
        )))
        .unwrap();
    let token_response = create_oauth_routes(state).oneshot(token_request).await.unwrap();
    assert_eq!(token_response.status(), StatusCode::OK);
    let token_body = body_json(token_response).await;
    assert!(token_body["access_token"].is_string());
    assert!(token_body["refresh_token"].is_string());
}
