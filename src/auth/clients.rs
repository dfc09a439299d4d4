//! Client Registry — RFC 7591 dynamic client registration.
//!
//! Grounded on the teacher's `auth/server.rs` registration handler and
//! `OAuthClient` model shape, rebuilt against the KV Store instead of the
//! teacher's `Storage` trait.

use crate::constants::KV_PREFIX_OAUTH_CLIENTS;
use crate::kv::{KvStore, key};
use crate::{McpError, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub scope: String,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Redirect URIs must be exact-match against the registered set, and
    /// must be HTTPS except for loopback (OAuth 2.1 security).
    pub fn validate_redirect_uri(&self, candidate: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == candidate)
    }
}

pub fn is_valid_redirect_uri_scheme(uri: &str, allow_loopback: bool) -> bool {
    if uri.is_empty() || uri.len() > 2048 {
        return false;
    }
    let Ok(parsed) = url::Url::parse(uri) else {
        return false;
    };
    if parsed.fragment().is_some() {
        return false;
    }
    if parsed.scheme() == "https" {
        return true;
    }
    allow_loopback
        && parsed.scheme() == "http"
        && matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1") | Some("::1"))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Dynamic client registration + lookup, backed by any `KvStore`.
pub struct ClientRegistry {
    kv: Arc<dyn KvStore>,
}

impl ClientRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn client_key(client_id: &str) -> crate::kv::Key {
        key(&[KV_PREFIX_OAUTH_CLIENTS, client_id])
    }

    pub async fn register(
        &self,
        client_name: String,
        redirect_uris: Vec<String>,
        grant_types: Vec<String>,
        response_types: Vec<String>,
        scope: String,
        client_uri: Option<String>,
        logo_uri: Option<String>,
        allow_loopback_redirects: bool,
        confidential: bool,
    ) -> Result<Client> {
        if client_name.is_empty() || client_name.len() > 100 {
            return Err(McpError::validation("client_name must be 1-100 characters"));
        }
        if redirect_uris.is_empty() {
            return Err(McpError::validation("redirect_uris is required"));
        }
        for uri in &redirect_uris {
            if !is_valid_redirect_uri_scheme(uri, allow_loopback_redirects) {
                return Err(McpError::validation(format!("invalid redirect_uri: {}", uri)));
            }
        }

        let client = Client {
            client_id: Uuid::new_v4().to_string(),
            client_secret: confidential.then(generate_secret),
            client_name,
            redirect_uris,
            grant_types: if grant_types.is_empty() {
                vec!["authorization_code".into(), "refresh_token".into()]
            } else {
                grant_types
            },
            response_types: if response_types.is_empty() {
                vec!["code".into()]
            } else {
                response_types
            },
            token_endpoint_auth_method: if confidential {
                "client_secret_post".into()
            } else {
                "none".into()
            },
            scope,
            client_uri,
            logo_uri,
            created_at: Utc::now(),
        };

        self.kv
            .set(&Self::client_key(&client.client_id), serde_json::to_vec(&client)?, None)
            .await?;
        Ok(client)
    }

    pub async fn get(&self, client_id: &str) -> Result<Option<Client>> {
        match self.kv.get(&Self::client_key(client_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn register_and_fetch_roundtrip() {
        let reg = registry();
        let client = reg
            .register(
                "demo".into(),
                vec!["https://example.com/callback".into()],
                vec![],
                vec![],
                "mcp".into(),
                None,
                None,
                true,
                true,
            )
            .await
            .unwrap();
        let fetched = reg.get(&client.client_id).await.unwrap().unwrap();
        assert_eq!(fetched.client_name, "demo");
        assert!(fetched.validate_redirect_uri("https://example.com/callback"));
    }

    #[tokio::test]
    async fn rejects_non_https_non_loopback_redirect() {
        let reg = registry();
        let result = reg
            .register(
                "demo".into(),
                vec!["http://evil.example.com/callback".into()],
                vec![],
                vec![],
                "mcp".into(),
                None,
                None,
                true,
                true,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn loopback_http_allowed_when_enabled() {
        let reg = registry();
        let result = reg
            .register(
                "demo".into(),
                vec!["http://127.0.0.1:8080/callback".into()],
                vec![],
                vec![],
                "mcp".into(),
                None,
                None,
                true,
                true,
            )
            .await;
        assert!(result.is_ok());
    }
}
