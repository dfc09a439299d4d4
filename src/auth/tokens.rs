//! MCP authorization codes, access tokens, and refresh tokens.
//!
//! Grounded on the teacher's `auth/server.rs` `OAuthToken` record (code and
//! access/refresh lifecycle fields in one struct) but split into three
//! entities per spec.md §3, each with its own KV-backed store and TTL.

use crate::constants::{KV_PREFIX_OAUTH_ACCESS, KV_PREFIX_OAUTH_CODES, KV_PREFIX_OAUTH_REFRESH};
use crate::kv::{KvStore, key};
use crate::{McpError, Result};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token stores backed by any `KvStore`. Authorization codes are consumed
/// atomically: `consume_code` uses compare-and-swap so two concurrent token
/// requests for the same code can't both succeed.
pub struct TokenStore {
    kv: Arc<dyn KvStore>,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn code_key(code: &str) -> crate::kv::Key {
        key(&[KV_PREFIX_OAUTH_CODES, code])
    }

    fn access_key(token: &str) -> crate::kv::Key {
        key(&[KV_PREFIX_OAUTH_ACCESS, token])
    }

    fn refresh_key(token: &str) -> crate::kv::Key {
        key(&[KV_PREFIX_OAUTH_REFRESH, token])
    }

    pub async fn issue_code(
        &self,
        client_id: String,
        user_id: String,
        redirect_uri: String,
        scope: String,
        code_challenge: Option<String>,
        code_challenge_method: Option<String>,
        ttl: Duration,
    ) -> Result<AuthorizationCode> {
        let now = Utc::now();
        let entry = AuthorizationCode {
            code: generate_token(),
            client_id,
            user_id,
            redirect_uri,
            scope,
            code_challenge,
            code_challenge_method,
            issued_at: now,
            expires_at: now + ttl,
        };
        self.kv
            .set(&Self::code_key(&entry.code), serde_json::to_vec(&entry)?, Some(ttl))
            .await?;
        Ok(entry)
    }

    /// Atomically fetch-and-delete: the first caller to race this for a
    /// given code wins, everyone else sees `Ok(None)`.
    pub async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        let code_key = Self::code_key(code);
        let raw = self.kv.get(&code_key).await?;
        let Some(raw) = raw else { return Ok(None) };
        let claimed = self
            .kv
            .compare_and_swap(&code_key, Some(raw.clone()), Vec::new(), None)
            .await?;
        if !claimed {
            return Ok(None);
        }
        self.kv.delete(&code_key).await?;
        let entry: AuthorizationCode = serde_json::from_slice(&raw)?;
        if entry.expires_at < Utc::now() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub async fn issue_access_token(
        &self,
        client_id: String,
        user_id: String,
        scope: String,
        ttl: Duration,
    ) -> Result<AccessToken> {
        let now = Utc::now();
        let entry = AccessToken {
            token: generate_token(),
            client_id,
            user_id,
            scope,
            issued_at: now,
            expires_at: now + ttl,
        };
        self.kv
            .set(&Self::access_key(&entry.token), serde_json::to_vec(&entry)?, Some(ttl))
            .await?;
        Ok(entry)
    }

    pub async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        match self.kv.get(&Self::access_key(token)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn revoke_access_token(&self, token: &str) -> Result<()> {
        self.kv.delete(&Self::access_key(token)).await
    }

    pub async fn issue_refresh_token(
        &self,
        client_id: String,
        user_id: String,
        scope: String,
        ttl: Duration,
    ) -> Result<RefreshToken> {
        let now = Utc::now();
        let entry = RefreshToken {
            token: generate_token(),
            client_id,
            user_id,
            scope,
            issued_at: now,
            expires_at: now + ttl,
        };
        self.kv
            .set(&Self::refresh_key(&entry.token), serde_json::to_vec(&entry)?, Some(ttl))
            .await?;
        Ok(entry)
    }

    /// Single-use rotation: the old refresh token is deleted outright (no
    /// token-family tracking — see DESIGN.md's Open Question decisions).
    /// Consumed atomically via compare-and-swap, the same pattern
    /// `consume_code` uses, so two concurrent refresh requests can't both
    /// win against one refresh token.
    pub async fn rotate_refresh_token(&self, old_token: &str) -> Result<Option<RefreshToken>> {
        let refresh_key = Self::refresh_key(old_token);
        let raw = self.kv.get(&refresh_key).await?;
        let Some(raw) = raw else { return Ok(None) };
        let claimed = self
            .kv
            .compare_and_swap(&refresh_key, Some(raw.clone()), Vec::new(), None)
            .await?;
        if !claimed {
            return Ok(None);
        }
        self.kv.delete(&refresh_key).await?;
        let entry: RefreshToken = serde_json::from_slice(&raw)?;
        if entry.expires_at < Utc::now() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub async fn revoke_refresh_token(&self, token: &str) -> Result<()> {
        self.kv.delete(&Self::refresh_key(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn store() -> TokenStore {
        TokenStore::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn code_is_consumed_exactly_once() {
        let store = store();
        let code = store
            .issue_code(
                "client1".into(),
                "user1".into(),
                "https://cb".into(),
                "mcp".into(),
                None,
                None,
                Duration::seconds(600),
            )
            .await
            .unwrap();

        let first = store.consume_code(&code.code).await.unwrap();
        assert!(first.is_some());
        let second = store.consume_code(&code.code).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn refresh_token_rotation_invalidates_old_token() {
        let store = store();
        let refresh = store
            .issue_refresh_token("client1".into(), "user1".into(), "mcp".into(), Duration::days(30))
            .await
            .unwrap();

        let rotated = store.rotate_refresh_token(&refresh.token).await.unwrap();
        assert!(rotated.is_some());
        let reuse = store.rotate_refresh_token(&refresh.token).await.unwrap();
        assert!(reuse.is_none());
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let store = store();
        let code = store
            .issue_code(
                "client1".into(),
                "user1".into(),
                "https://cb".into(),
                "mcp".into(),
                None,
                None,
                Duration::milliseconds(-1),
            )
            .await
            .unwrap();
        assert!(store.consume_code(&code.code).await.unwrap().is_none());
    }
}
