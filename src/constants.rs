//! Constants used throughout mcpforge
//!
//! Named values for environment variable names, HTTP paths, header names,
//! and KV key prefixes, following the same "no magic strings" convention
//! the rest of the crate uses.

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

pub const ENV_MCP_TRANSPORT: &str = "MCP_TRANSPORT";
pub const ENV_HTTP_HOST: &str = "HTTP_HOST";
pub const ENV_HTTP_PORT: &str = "HTTP_PORT";
pub const ENV_HTTP_CORS_ENABLED: &str = "HTTP_CORS_ENABLED";
pub const ENV_HTTP_CORS_ORIGINS: &str = "HTTP_CORS_ORIGINS";

pub const ENV_MCP_SESSION_TIMEOUT: &str = "MCP_SESSION_TIMEOUT";
pub const ENV_MCP_SESSION_CLEANUP_INTERVAL: &str = "MCP_SESSION_CLEANUP_INTERVAL";
pub const ENV_MCP_MAX_CONCURRENT_SESSIONS: &str = "MCP_MAX_CONCURRENT_SESSIONS";
pub const ENV_MCP_ENABLE_SESSION_PERSISTENCE: &str = "MCP_ENABLE_SESSION_PERSISTENCE";
pub const ENV_MCP_REQUEST_TIMEOUT: &str = "MCP_REQUEST_TIMEOUT";
pub const ENV_MCP_MAX_REQUEST_SIZE: &str = "MCP_MAX_REQUEST_SIZE";

pub const ENV_MCP_AUTH_ENABLED: &str = "MCP_AUTH_ENABLED";
pub const ENV_MCP_AUTH_HTTP_ENABLED: &str = "MCP_AUTH_HTTP_ENABLED";
pub const ENV_MCP_AUTH_HTTP_SKIP: &str = "MCP_AUTH_HTTP_SKIP";
pub const ENV_MCP_AUTH_HTTP_REQUIRE: &str = "MCP_AUTH_HTTP_REQUIRE";
pub const ENV_MCP_AUTH_STDIO_ENABLED: &str = "MCP_AUTH_STDIO_ENABLED";
pub const ENV_MCP_AUTH_STDIO_ALLOW_OAUTH: &str = "MCP_AUTH_STDIO_ALLOW_OAUTH";
pub const ENV_MCP_AUTH_STDIO_SKIP: &str = "MCP_AUTH_STDIO_SKIP";
pub const ENV_MCP_SESSION_BINDING_ENABLED: &str = "MCP_SESSION_BINDING_ENABLED";
pub const ENV_MCP_SESSION_BINDING_AUTO_REFRESH: &str = "MCP_SESSION_BINDING_AUTO_REFRESH";
pub const ENV_MCP_SESSION_BINDING_TIMEOUT_MS: &str = "MCP_SESSION_BINDING_TIMEOUT_MS";
pub const ENV_MCP_AUTH_ERROR_DETAILS: &str = "MCP_AUTH_ERROR_DETAILS";
pub const ENV_MCP_AUTH_ERROR_GUIDANCE: &str = "MCP_AUTH_ERROR_GUIDANCE";
pub const ENV_MCP_AUTH_ERROR_CUSTOM_HEADERS: &str = "MCP_AUTH_ERROR_CUSTOM_HEADERS";

pub const ENV_OAUTH_PROVIDER_CLIENT_ID: &str = "OAUTH_PROVIDER_CLIENT_ID";
pub const ENV_OAUTH_PROVIDER_CLIENT_SECRET: &str = "OAUTH_PROVIDER_CLIENT_SECRET";
pub const ENV_OAUTH_PROVIDER_REDIRECT_URI: &str = "OAUTH_PROVIDER_REDIRECT_URI";
pub const ENV_OAUTH_PROVIDER_ISSUER: &str = "OAUTH_PROVIDER_ISSUER";
pub const ENV_OAUTH_PROVIDER_PKCE: &str = "OAUTH_PROVIDER_PKCE";
pub const ENV_OAUTH_PROVIDER_DYNAMIC_REGISTRATION: &str = "OAUTH_PROVIDER_DYNAMIC_REGISTRATION";
pub const ENV_OAUTH_PROVIDER_TOKEN_EXPIRATION: &str = "OAUTH_PROVIDER_TOKEN_EXPIRATION";
pub const ENV_OAUTH_PROVIDER_REFRESH_TOKEN_EXPIRATION: &str =
    "OAUTH_PROVIDER_REFRESH_TOKEN_EXPIRATION";

pub const ENV_OAUTH_CONSUMER_PROVIDER: &str = "OAUTH_CONSUMER_PROVIDER";
pub const ENV_OAUTH_CONSUMER_CLIENT_ID: &str = "OAUTH_CONSUMER_CLIENT_ID";
pub const ENV_OAUTH_CONSUMER_CLIENT_SECRET: &str = "OAUTH_CONSUMER_CLIENT_SECRET";
pub const ENV_OAUTH_CONSUMER_AUTH_URL: &str = "OAUTH_CONSUMER_AUTH_URL";
pub const ENV_OAUTH_CONSUMER_TOKEN_URL: &str = "OAUTH_CONSUMER_TOKEN_URL";
pub const ENV_OAUTH_CONSUMER_REDIRECT_URI: &str = "OAUTH_CONSUMER_REDIRECT_URI";
pub const ENV_OAUTH_CONSUMER_SCOPES: &str = "OAUTH_CONSUMER_SCOPES";
pub const ENV_OAUTH_CONSUMER_USERINFO_URL: &str = "OAUTH_CONSUMER_USERINFO_URL";

pub const ENV_KV_PATH: &str = "DENO_KV_PATH";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_LOG_FILE: &str = "LOG_FILE";
pub const ENV_AUDIT_ENABLED: &str = "AUDIT_ENABLED";
pub const ENV_AUDIT_LOG_FILE: &str = "AUDIT_LOG_FILE";
pub const ENV_AUDIT_RETENTION_DAYS: &str = "AUDIT_RETENTION_DAYS";

pub const ENV_PLUGINS_DISCOVERY_PATHS: &str = "PLUGINS_DISCOVERY_PATHS";
pub const ENV_PLUGINS_AUTOLOAD: &str = "PLUGINS_AUTOLOAD";
pub const ENV_PLUGINS_WATCH_CHANGES: &str = "PLUGINS_WATCH_CHANGES";
pub const ENV_PLUGINS_ALLOWED_LIST: &str = "PLUGINS_ALLOWED_LIST";
pub const ENV_PLUGINS_BLOCKED_LIST: &str = "PLUGINS_BLOCKED_LIST";

// ============================================================================
// HTTP SURFACE
// ============================================================================

pub const HTTP_PATH_MCP: &str = "/mcp";
pub const HTTP_PATH_AUTHORIZE: &str = "/authorize";
pub const HTTP_PATH_TOKEN: &str = "/token";
pub const HTTP_PATH_REGISTER: &str = "/register";
pub const HTTP_PATH_CALLBACK: &str = "/callback";
pub const HTTP_PATH_OAUTH_CALLBACK: &str = "/oauth/callback";
pub const HTTP_PATH_AUTH_CALLBACK: &str = "/auth/callback";
pub const HTTP_PATH_API_V1_AUTH_CALLBACK: &str = "/api/v1/auth/callback";
pub const HTTP_PATH_API_V1_OAUTH_CALLBACK: &str = "/api/v1/oauth/callback";
pub const HTTP_PATH_WELL_KNOWN_AS: &str = "/.well-known/oauth-authorization-server";
pub const HTTP_PATH_WELL_KNOWN_PROTECTED_RESOURCE: &str = "/.well-known/oauth-protected-resource";
pub const HTTP_PATH_STATUS: &str = "/status";
pub const HTTP_PATH_HEALTH: &str = "/health";
pub const HTTP_PATH_METRICS: &str = "/metrics";

pub const HEADER_MCP_SESSION_ID: &str = "Mcp-Session-Id";
pub const HEADER_LAST_EVENT_ID: &str = "Last-Event-ID";
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_WWW_AUTHENTICATE: &str = "WWW-Authenticate";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

// ============================================================================
// KV KEY PREFIXES
// ============================================================================

pub const KV_PREFIX_SESSIONS: &str = "sessions";
pub const KV_PREFIX_EVENTS: &str = "events";
pub const KV_PREFIX_OAUTH_CODES: &str = "oauth/codes";
pub const KV_PREFIX_OAUTH_ACCESS: &str = "oauth/access";
pub const KV_PREFIX_OAUTH_REFRESH: &str = "oauth/refresh";
pub const KV_PREFIX_OAUTH_CLIENTS: &str = "oauth/clients";
pub const KV_PREFIX_OAUTH_MCP_AUTH_REQUESTS: &str = "oauth/mcp_auth_requests";
pub const KV_PREFIX_CREDENTIALS: &str = "credentials";

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 3330;
pub const DEFAULT_SESSION_TIMEOUT_MS: i64 = 30 * 60 * 1000;
pub const DEFAULT_SESSION_CLEANUP_INTERVAL_SECS: u64 = 5 * 60;
pub const DEFAULT_EVENT_STORE_CLEANUP_INTERVAL_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_EVENT_STORE_KEEP_LAST: usize = 1000;
pub const DEFAULT_SSE_KEEPALIVE_SECS: u64 = 25;
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 64 * 1024;
pub const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 8 * 1024;
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;
pub const DEFAULT_AUTH_CODE_TTL_SECS: i64 = 600;
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 30;
pub const DEFAULT_UPSTREAM_REFRESH_SKEW_SECS: i64 = 300;
/// How long an evicted session's tombstone record is kept in the KV store
/// so a racing lookup still gets `Expired` rather than `Unknown`.
pub const DEFAULT_SESSION_TOMBSTONE_RETENTION_SECS: i64 = 5 * 60;

// ============================================================================
// RFC ERROR CODES
// ============================================================================

pub const OAUTH_ERR_INVALID_GRANT: &str = "invalid_grant";
pub const OAUTH_ERR_INVALID_CLIENT: &str = "invalid_client";
pub const OAUTH_ERR_INVALID_REQUEST: &str = "invalid_request";
pub const OAUTH_ERR_UNSUPPORTED_GRANT_TYPE: &str = "unsupported_grant_type";

pub const MCP_ERR_TOKEN_EXPIRED: &str = "mcp_token_expired";
pub const MCP_ERR_THIRD_PARTY_REAUTH_REQUIRED: &str = "third_party_reauth_required";
pub const MCP_ACTION_THIRD_PARTY_TOKEN_REFRESHED: &str = "third_party_token_refreshed";

// ============================================================================
// GRANT / RESPONSE TYPES
// ============================================================================

pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_TYPE_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_TYPE_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const RESPONSE_TYPE_CODE: &str = "code";
pub const CODE_CHALLENGE_METHOD_S256: &str = "S256";

// ============================================================================
// PLUGIN MANIFEST FILE NAME
// ============================================================================

pub const PLUGIN_MANIFEST_FILE_NAME: &str = "plugin.manifest.json";
