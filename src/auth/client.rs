//! OAuth Consumer — drives an upstream provider's authorization code flow
//! on behalf of MCP users.
//!
//! Grounded on the teacher's `auth/client.rs` (`oauth2` crate usage, PKCE,
//! 5-minute refresh skew buffer), narrowed from the teacher's
//! registry-driven multi-provider manager to a single upstream provider
//! configured via the `OAUTH_CONSUMER_*` environment variables, since that
//! is the shape spec.md's OAuth Consumer describes.

use crate::auth::credentials::{CredentialStore, UpstreamCredential};
use crate::constants::DEFAULT_UPSTREAM_REFRESH_SKEW_SECS;
use crate::{McpError, Result};
use chrono::{Duration, Utc};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
    basic::BasicClient,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct UpstreamProviderConfig {
    pub provider_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// OIDC userinfo endpoint, queried with the freshly exchanged access
    /// token to derive a stable MCP user id (its `sub` claim) — never the
    /// access token itself, which is a live bearer-capable secret.
    pub userinfo_url: String,
}

pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub scopes: Vec<String>,
    /// The upstream account's stable identifier (`sub` claim), to be used
    /// as the MCP user id — distinct from the access token.
    pub subject: String,
}

/// Drives the authorization-code flow against one configured upstream
/// provider, persisting results through the `CredentialStore`.
pub struct OAuthConsumer {
    config: UpstreamProviderConfig,
    credentials: Arc<CredentialStore>,
    http_client: reqwest::Client,
    /// Pending PKCE verifiers keyed by the CSRF state we handed the user
    /// agent, so `exchange_code_for_tokens` can recover them on callback.
    pending_verifiers: RwLock<HashMap<String, String>>,
}

impl OAuthConsumer {
    pub fn new(config: UpstreamProviderConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| McpError::config(format!("failed to build OAuth HTTP client: {}", e)))?;
        Ok(Self {
            config,
            credentials,
            http_client,
            pending_verifiers: RwLock::new(HashMap::new()),
        })
    }

    fn oauth2_client(&self) -> Result<BasicClient> {
        Ok(BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.config.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(self.config.auth_url.clone())
                    .map_err(|e| McpError::oauth(format!("invalid auth_url: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(self.config.token_url.clone())
                    .map_err(|e| McpError::oauth(format!("invalid token_url: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(self.config.redirect_uri.clone())
                    .map_err(|e| McpError::oauth(format!("invalid redirect_uri: {}", e)))?,
            ))
    }

    /// Build the upstream authorize URL, tagging the request with
    /// `csrf_state` verbatim so the caller can recover the PKCE verifier
    /// when the upstream provider echoes this same value back on callback.
    pub fn get_authorize_url(&self, csrf_state: &str) -> Result<String> {
        let client = self.oauth2_client()?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, _) = client
            .authorize_url(|| CsrfToken::new(csrf_state.to_string()))
            .add_scopes(self.config.scopes.iter().map(|s| Scope::new(s.clone())))
            .set_pkce_challenge(pkce_challenge)
            .url();

        self.pending_verifiers
            .write()
            .insert(csrf_state.to_string(), pkce_verifier.secret().clone());
        Ok(auth_url.to_string())
    }

    /// Exchange an authorization code for upstream tokens and persist them
    /// against `user_id` in the credential store.
    pub async fn exchange_code_for_tokens(
        &self,
        user_id: &str,
        code: &str,
        csrf_state: &str,
    ) -> Result<ExchangedTokens> {
        let code_verifier = self
            .pending_verifiers
            .write()
            .remove(csrf_state)
            .ok_or_else(|| McpError::oauth("no pending authorization for this state"))?;

        let client = self.oauth2_client()?;
        let token_result = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(code_verifier))
            .request_async(&self.http_client)
            .await
            .map_err(|e| McpError::oauth(format!("token exchange failed: {}", e)))?;

        let expires_at = token_result
            .expires_in()
            .map(|d| Utc::now() + Duration::seconds(d.as_secs() as i64));
        let scopes: Vec<String> = token_result
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
            .unwrap_or_else(|| self.config.scopes.clone());

        let access_token = token_result.access_token().secret().clone();
        let subject = self.fetch_subject(&access_token).await?;

        let credential = UpstreamCredential {
            user_id: user_id.to_string(),
            provider_id: self.config.provider_id.clone(),
            access_token,
            refresh_token: token_result.refresh_token().map(|t| t.secret().clone()),
            expires_at: expires_at.unwrap_or_else(|| Utc::now() + Duration::hours(1)),
            scopes: scopes.clone(),
        };
        self.credentials.put(&credential).await?;

        Ok(ExchangedTokens {
            access_token: credential.access_token,
            refresh_token: credential.refresh_token,
            expires_at,
            scopes,
            subject,
        })
    }

    /// Query the upstream userinfo endpoint for the account's stable
    /// identifier, trying the standard OIDC `sub` claim before the looser
    /// `id` some non-OIDC providers use instead.
    async fn fetch_subject(&self, access_token: &str) -> Result<String> {
        let response = self
            .http_client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| McpError::oauth(format!("userinfo request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(McpError::oauth(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| McpError::oauth(format!("userinfo response was not valid JSON: {}", e)))?;
        body.get("sub")
            .or_else(|| body.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| McpError::oauth("userinfo response had no sub or id claim"))
    }

    /// Whether `user_id`'s stored upstream credential is within the refresh
    /// skew window, for callers (the authentication middleware) that need to
    /// know whether `get_access_token` is about to perform a refresh.
    pub async fn upstream_needs_refresh(&self, user_id: &str) -> Result<bool> {
        let cred = self.credentials.require(user_id, &self.config.provider_id).await?;
        Ok(cred.needs_refresh(Duration::seconds(DEFAULT_UPSTREAM_REFRESH_SKEW_SECS)))
    }

    /// Re-key a credential persisted under a placeholder identity to its
    /// real MCP user id. The authorization code flow bridges to the
    /// upstream provider before the MCP user id is known (it's derived
    /// from the exchanged upstream access token), so `exchange_code_for_tokens`
    /// always persists under `placeholder_user_id`; the caller corrects
    /// this once the final id is available.
    pub async fn rekey_credential(&self, placeholder_user_id: &str, final_user_id: &str) -> Result<()> {
        if placeholder_user_id == final_user_id {
            return Ok(());
        }
        let mut credential = self.credentials.require(placeholder_user_id, &self.config.provider_id).await?;
        credential.user_id = final_user_id.to_string();
        self.credentials.put(&credential).await?;
        self.credentials.revoke(placeholder_user_id, &self.config.provider_id).await?;
        Ok(())
    }

    pub async fn is_user_authenticated(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .credentials
            .get(user_id, &self.config.provider_id)
            .await?
            .is_some())
    }

    /// Refresh the stored credential for `user_id` using its refresh token.
    pub async fn refresh_access_token(&self, user_id: &str) -> Result<UpstreamCredential> {
        let cred = self.credentials.require(user_id, &self.config.provider_id).await?;
        let refresh_token = cred
            .refresh_token
            .clone()
            .ok_or_else(|| McpError::oauth("no refresh token available"))?;

        let client = self.oauth2_client()?;
        let token_result = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(&self.http_client)
            .await
            .map_err(|e| McpError::oauth(format!("token refresh failed: {}", e)))?;

        let expires_at = token_result
            .expires_in()
            .map(|d| Utc::now() + Duration::seconds(d.as_secs() as i64))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        let refreshed = UpstreamCredential {
            user_id: user_id.to_string(),
            provider_id: self.config.provider_id.clone(),
            access_token: token_result.access_token().secret().clone(),
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().clone())
                .or(cred.refresh_token),
            expires_at,
            scopes: cred.scopes,
        };
        self.credentials.put(&refreshed).await?;
        Ok(refreshed)
    }

    /// Get a usable access token for `user_id`, refreshing first if within
    /// the skew window of expiring.
    pub async fn get_access_token(&self, user_id: &str) -> Result<String> {
        let cred = self.credentials.require(user_id, &self.config.provider_id).await?;
        if cred.needs_refresh(Duration::seconds(DEFAULT_UPSTREAM_REFRESH_SKEW_SECS)) {
            match self.refresh_access_token(user_id).await {
                Ok(refreshed) => return Ok(refreshed.access_token),
                Err(e) => {
                    tracing::warn!("upstream token refresh failed for {}: {}", user_id, e);
                    if cred.is_expired() {
                        return Err(e);
                    }
                }
            }
        }
        Ok(cred.access_token)
    }
}
