//! Configuration — dual file + environment-variable surface.
//!
//! A deployment may drop a JSON/YAML config file at the path named by
//! `MCPFORGE_CONFIG` (default `mcpforge.config.json`) for durable settings,
//! then override any field at process start with the environment variables
//! named in `constants.rs` — the same file-then-env layering the teacher
//! uses for `flow.config.json`, reapplied to this crate's settings surface
//! (transport, sessions, auth, OAuth, KV, logging, audit, plugins).

use crate::auth::client::UpstreamProviderConfig;
use crate::auth::request_context::TransportKind;
use crate::constants::*;
use crate::{McpError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "mcpforge.config.json";
pub const ENV_CONFIG_PATH: &str = "MCPFORGE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub request: RequestConfig,
    pub auth: AuthConfig,
    pub oauth_provider: OAuthProviderConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_consumer: Option<OAuthConsumerConfig>,
    pub kv: KvConfig,
    pub log: LogConfig,
    pub audit: AuditConfig,
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportConfig {
    /// "stdio" or "http"
    pub kind: String,
    pub http_host: String,
    pub http_port: u16,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: "stdio".to_string(),
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            cors_enabled: false,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl TransportConfig {
    pub fn transport_kind(&self) -> TransportKind {
        match self.kind.as_str() {
            "http" => TransportKind::Http,
            _ => TransportKind::Stdio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub timeout_ms: i64,
    pub cleanup_interval_secs: u64,
    pub max_concurrent_sessions: usize,
    pub enable_persistence: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            cleanup_interval_secs: DEFAULT_SESSION_CLEANUP_INTERVAL_SECS,
            max_concurrent_sessions: 10_000,
            enable_persistence: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestConfig {
    pub timeout_secs: u64,
    pub max_request_size_bytes: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_secs: 30, max_request_size_bytes: 10 * 1024 * 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub http_enabled: bool,
    pub http_skip_paths: Vec<String>,
    pub http_require: bool,
    pub stdio_enabled: bool,
    pub stdio_allow_oauth: bool,
    pub stdio_skip: bool,
    pub session_binding_enabled: bool,
    pub session_binding_auto_refresh: bool,
    pub session_binding_timeout_ms: u64,
    pub error_details: bool,
    pub error_guidance: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_enabled: true,
            http_skip_paths: Vec::new(),
            http_require: true,
            stdio_enabled: false,
            stdio_allow_oauth: false,
            stdio_skip: true,
            session_binding_enabled: true,
            session_binding_auto_refresh: true,
            session_binding_timeout_ms: 5000,
            error_details: true,
            error_guidance: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OAuthProviderConfig {
    pub issuer: String,
    pub require_pkce: bool,
    pub allow_loopback_redirects: bool,
    pub token_expiration_secs: i64,
    pub refresh_token_expiration_secs: i64,
    pub dynamic_registration: bool,
}

impl Default for OAuthProviderConfig {
    fn default() -> Self {
        Self {
            issuer: format!("http://{}:{}", DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT),
            require_pkce: true,
            allow_loopback_redirects: true,
            token_expiration_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_expiration_secs: DEFAULT_REFRESH_TOKEN_TTL_SECS,
            dynamic_registration: true,
        }
    }
}

/// Upstream provider this server bridges to on a user's behalf. Absent
/// unless an operator opts in via `OAUTH_CONSUMER_PROVIDER`, since a bare
/// MCP authorization server has no third party to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConsumerConfig {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Queried with the exchanged upstream access token to derive the MCP
    /// user id from the account's `sub` claim.
    pub userinfo_url: String,
}

impl From<OAuthConsumerConfig> for UpstreamProviderConfig {
    fn from(c: OAuthConsumerConfig) -> Self {
        UpstreamProviderConfig {
            provider_id: c.provider,
            client_id: c.client_id,
            client_secret: c.client_secret,
            auth_url: c.auth_url,
            token_url: c.token_url,
            redirect_uri: c.redirect_uri,
            scopes: c.scopes,
            userinfo_url: c.userinfo_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KvConfig {
    /// "memory" or "sqlite:<path>"
    pub driver: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self { driver: "memory".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), file: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: false, log_file: None, retention_days: 90 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginsConfig {
    pub discovery_paths: Vec<String>,
    pub autoload: bool,
    pub watch_changes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    pub blocked: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            discovery_paths: Vec::new(),
            autoload: true,
            watch_changes: false,
            allowed: None,
            blocked: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            request: RequestConfig::default(),
            auth: AuthConfig::default(),
            oauth_provider: OAuthProviderConfig::default(),
            oauth_consumer: None,
            kv: KvConfig::default(),
            log: LogConfig::default(),
            audit: AuditConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default config file path (if present), then apply
    /// environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| CONFIG_FILE_NAME.to_string());
        let mut config = Self::load_from_path(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Build a complete config purely from environment variables, with
    /// documented defaults for everything unset — the common case of
    /// running config-file-free.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, defaulting if it doesn't
    /// exist. Supports JSON and YAML, selected by file extension.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| McpError::config(format!("failed to parse YAML config: {e}")))?,
            _ => {
                validate_against_schema(content.as_bytes())?;
                serde_json::from_str(&content)
                    .map_err(|e| McpError::config(format!("failed to parse JSON config: {e}")))?
            }
        };
        Ok(config)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)
                .map_err(|e| McpError::config(format!("failed to serialize YAML config: {e}")))?,
            _ => serde_json::to_string_pretty(self)?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay every environment variable named in `constants.rs` onto an
    /// already-loaded config, env taking precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string(ENV_MCP_TRANSPORT) {
            self.transport.kind = v;
        }
        if let Some(v) = env_string(ENV_HTTP_HOST) {
            self.transport.http_host = v;
        }
        if let Some(v) = env_u16(ENV_HTTP_PORT) {
            self.transport.http_port = v;
        }
        if let Some(v) = env_bool(ENV_HTTP_CORS_ENABLED) {
            self.transport.cors_enabled = v;
        }
        if let Some(v) = env_string(ENV_HTTP_CORS_ORIGINS) {
            self.transport.cors_origins = split_csv(&v);
        }

        if let Some(v) = env_i64(ENV_MCP_SESSION_TIMEOUT) {
            self.session.timeout_ms = v;
        }
        if let Some(v) = env_u64(ENV_MCP_SESSION_CLEANUP_INTERVAL) {
            self.session.cleanup_interval_secs = v;
        }
        if let Some(v) = env_usize(ENV_MCP_MAX_CONCURRENT_SESSIONS) {
            self.session.max_concurrent_sessions = v;
        }
        if let Some(v) = env_bool(ENV_MCP_ENABLE_SESSION_PERSISTENCE) {
            self.session.enable_persistence = v;
        }
        if let Some(v) = env_u64(ENV_MCP_REQUEST_TIMEOUT) {
            self.request.timeout_secs = v;
        }
        if let Some(v) = env_usize(ENV_MCP_MAX_REQUEST_SIZE) {
            self.request.max_request_size_bytes = v;
        }

        if let Some(v) = env_bool(ENV_MCP_AUTH_ENABLED) {
            self.auth.enabled = v;
        }
        if let Some(v) = env_bool(ENV_MCP_AUTH_HTTP_ENABLED) {
            self.auth.http_enabled = v;
        }
        if let Some(v) = env_string(ENV_MCP_AUTH_HTTP_SKIP) {
            self.auth.http_skip_paths = split_csv(&v);
        }
        if let Some(v) = env_bool(ENV_MCP_AUTH_HTTP_REQUIRE) {
            self.auth.http_require = v;
        }
        if let Some(v) = env_bool(ENV_MCP_AUTH_STDIO_ENABLED) {
            self.auth.stdio_enabled = v;
        }
        if let Some(v) = env_bool(ENV_MCP_AUTH_STDIO_ALLOW_OAUTH) {
            self.auth.stdio_allow_oauth = v;
        }
        if let Some(v) = env_bool(ENV_MCP_AUTH_STDIO_SKIP) {
            self.auth.stdio_skip = v;
        }
        if let Some(v) = env_bool(ENV_MCP_SESSION_BINDING_ENABLED) {
            self.auth.session_binding_enabled = v;
        }
        if let Some(v) = env_bool(ENV_MCP_SESSION_BINDING_AUTO_REFRESH) {
            self.auth.session_binding_auto_refresh = v;
        }
        if let Some(v) = env_u64(ENV_MCP_SESSION_BINDING_TIMEOUT_MS) {
            self.auth.session_binding_timeout_ms = v;
        }
        if let Some(v) = env_bool(ENV_MCP_AUTH_ERROR_DETAILS) {
            self.auth.error_details = v;
        }
        if let Some(v) = env_bool(ENV_MCP_AUTH_ERROR_GUIDANCE) {
            self.auth.error_guidance = v;
        }

        if let Some(v) = env_string(ENV_OAUTH_PROVIDER_ISSUER) {
            self.oauth_provider.issuer = v;
        }
        if let Some(v) = env_bool(ENV_OAUTH_PROVIDER_PKCE) {
            self.oauth_provider.require_pkce = v;
        }
        if let Some(v) = env_bool(ENV_OAUTH_PROVIDER_DYNAMIC_REGISTRATION) {
            self.oauth_provider.dynamic_registration = v;
        }
        if let Some(v) = env_i64(ENV_OAUTH_PROVIDER_TOKEN_EXPIRATION) {
            self.oauth_provider.token_expiration_secs = v;
        }
        if let Some(v) = env_i64(ENV_OAUTH_PROVIDER_REFRESH_TOKEN_EXPIRATION) {
            self.oauth_provider.refresh_token_expiration_secs = v;
        }

        if let Some(provider) = env_string(ENV_OAUTH_CONSUMER_PROVIDER) {
            let existing = self.oauth_consumer.take();
            self.oauth_consumer = Some(OAuthConsumerConfig {
                provider,
                client_id: env_string(ENV_OAUTH_CONSUMER_CLIENT_ID)
                    .or_else(|| existing.as_ref().map(|c| c.client_id.clone()))
                    .unwrap_or_default(),
                client_secret: env_string(ENV_OAUTH_CONSUMER_CLIENT_SECRET)
                    .or_else(|| existing.as_ref().map(|c| c.client_secret.clone()))
                    .unwrap_or_default(),
                auth_url: env_string(ENV_OAUTH_CONSUMER_AUTH_URL)
                    .or_else(|| existing.as_ref().map(|c| c.auth_url.clone()))
                    .unwrap_or_default(),
                token_url: env_string(ENV_OAUTH_CONSUMER_TOKEN_URL)
                    .or_else(|| existing.as_ref().map(|c| c.token_url.clone()))
                    .unwrap_or_default(),
                redirect_uri: env_string(ENV_OAUTH_CONSUMER_REDIRECT_URI)
                    .or_else(|| existing.as_ref().map(|c| c.redirect_uri.clone()))
                    .unwrap_or_default(),
                scopes: env_string(ENV_OAUTH_CONSUMER_SCOPES)
                    .map(|v| split_csv(&v))
                    .or_else(|| existing.as_ref().map(|c| c.scopes.clone()))
                    .unwrap_or_default(),
                userinfo_url: env_string(ENV_OAUTH_CONSUMER_USERINFO_URL)
                    .or_else(|| existing.as_ref().map(|c| c.userinfo_url.clone()))
                    .unwrap_or_default(),
            });
        }

        if let Some(v) = env_string(ENV_KV_PATH) {
            self.kv.driver = format!("sqlite:{v}");
        }
        if let Some(v) = env_string(ENV_LOG_LEVEL) {
            self.log.level = v;
        }
        if let Some(v) = env_string(ENV_LOG_FORMAT) {
            self.log.format = v;
        }
        if let Some(v) = env_string(ENV_LOG_FILE) {
            self.log.file = Some(v);
        }
        if let Some(v) = env_bool(ENV_AUDIT_ENABLED) {
            self.audit.enabled = v;
        }
        if let Some(v) = env_string(ENV_AUDIT_LOG_FILE) {
            self.audit.log_file = Some(v);
        }
        if let Some(v) = env_u32(ENV_AUDIT_RETENTION_DAYS) {
            self.audit.retention_days = v;
        }

        if let Some(v) = env_string(ENV_PLUGINS_DISCOVERY_PATHS) {
            self.plugins.discovery_paths = split_csv(&v);
        }
        if let Some(v) = env_bool(ENV_PLUGINS_AUTOLOAD) {
            self.plugins.autoload = v;
        }
        if let Some(v) = env_bool(ENV_PLUGINS_WATCH_CHANGES) {
            self.plugins.watch_changes = v;
        }
        if let Some(v) = env_string(ENV_PLUGINS_ALLOWED_LIST) {
            self.plugins.allowed = Some(split_csv(&v));
        }
        if let Some(v) = env_string(ENV_PLUGINS_BLOCKED_LIST) {
            self.plugins.blocked = split_csv(&v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.transport.kind.as_str(), "stdio" | "http") {
            return Err(McpError::config(format!(
                "unsupported transport '{}': expected stdio or http",
                self.transport.kind
            )));
        }
        if self.transport.kind == "http" && self.transport.http_host.is_empty() {
            return Err(McpError::config("transport.httpHost cannot be empty"));
        }
        if self.session.timeout_ms <= 0 {
            return Err(McpError::config("session.timeoutMs must be positive"));
        }
        if self.oauth_provider.issuer.is_empty() {
            return Err(McpError::config("oauthProvider.issuer cannot be empty"));
        }
        if let Some(ref consumer) = self.oauth_consumer
            && (consumer.client_id.is_empty() || consumer.auth_url.is_empty() || consumer.token_url.is_empty())
        {
            return Err(McpError::config(
                "oauthConsumer requires clientId, authUrl, and tokenUrl when configured",
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_u16(name: &str) -> Option<u16> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn env_u32(name: &str) -> Option<u32> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn env_i64(name: &str) -> Option<i64> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

/// Validates a raw JSON config document against a minimal schema before
/// full deserialization, so a malformed file fails with a field-level
/// message rather than a generic serde error.
fn validate_against_schema(raw: &[u8]) -> Result<()> {
    use once_cell::sync::Lazy;

    static CONFIG_SCHEMA: Lazy<jsonschema::Validator> = Lazy::new(|| {
        let schema_json = serde_json::json!({
            "type": "object",
            "properties": {
                "transport": {
                    "type": "object",
                    "properties": {
                        "kind": {"type": "string", "enum": ["stdio", "http"]},
                        "httpPort": {"type": "integer", "minimum": 1, "maximum": 65535}
                    }
                },
                "oauthProvider": {"type": "object"},
                "oauthConsumer": {"type": "object"},
                "kv": {"type": "object"},
                "log": {"type": "object"},
                "audit": {"type": "object"},
                "plugins": {"type": "object"}
            }
        });
        jsonschema::validator_for(&schema_json).expect("config schema must compile")
    });

    let value: serde_json::Value = serde_json::from_slice(raw)?;
    if !CONFIG_SCHEMA.is_valid(&value) {
        let errors: Vec<String> =
            CONFIG_SCHEMA.iter_errors(&value).map(|e| format!("{}: {}", e.instance_path, e)).collect();
        return Err(McpError::config(format!("config validation failed:\n  - {}", errors.join("\n  - "))));
    }
    Ok(())
}

#[cfg(test)]
mod config_test;
