//! Credential Store — upstream OAuth provider tokens held on behalf of a
//! user, mutated by the OAuth Consumer on refresh.
//!
//! Grounded on the teacher's `OAuthToken`/`OAuthCredential` field shapes in
//! `model.rs`, rebuilt against the KV Store and split out from the MCP
//! server's own access/refresh tokens (`tokens.rs`) since they have
//! different owners and lifecycles.

use crate::constants::KV_PREFIX_CREDENTIALS;
use crate::kv::{KvStore, key};
use crate::{McpError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamCredential {
    pub user_id: String,
    pub provider_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl UpstreamCredential {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Within `skew` of expiring — the OAuth Consumer refreshes proactively
    /// at this point rather than waiting for an outright 401 from upstream.
    pub fn needs_refresh(&self, skew: Duration) -> bool {
        Utc::now() + skew >= self.expires_at
    }
}

pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn credential_key(user_id: &str, provider_id: &str) -> crate::kv::Key {
        key(&[KV_PREFIX_CREDENTIALS, provider_id, user_id])
    }

    pub async fn get(&self, user_id: &str, provider_id: &str) -> Result<Option<UpstreamCredential>> {
        match self.kv.get(&Self::credential_key(user_id, provider_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, credential: &UpstreamCredential) -> Result<()> {
        self.kv
            .set(
                &Self::credential_key(&credential.user_id, &credential.provider_id),
                serde_json::to_vec(credential)?,
                None,
            )
            .await
    }

    pub async fn revoke(&self, user_id: &str, provider_id: &str) -> Result<()> {
        self.kv.delete(&Self::credential_key(user_id, provider_id)).await
    }

    pub async fn require(&self, user_id: &str, provider_id: &str) -> Result<UpstreamCredential> {
        self.get(user_id, provider_id)
            .await?
            .ok_or_else(|| McpError::not_found("upstream_credential", format!("{}/{}", provider_id, user_id)))
    }
}
