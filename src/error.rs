//! Error types for mcpforge
//!
//! Mirrors the error taxonomy of the transport/auth/registry design one to
//! one: each variant carries the information the HTTP layer needs to render
//! the JSON-RPC error envelope, and the STDIO layer needs to render an MCP
//! JSON-RPC error object. Library components never panic across a boundary;
//! they return `McpError`.

use thiserror::Error;

/// Main error type for mcpforge operations
#[derive(Error, Debug)]
pub enum McpError {
    #[error("validation failed: {message}")]
    Validation { field: Option<String>, message: String },

    #[error("authentication failed: {guidance}")]
    Authentication {
        error_code: &'static str,
        guidance: String,
    },

    #[error("authorization failed: {error_code}")]
    Authorization { error_code: &'static str },

    #[error("not found: {entity} '{id}'")]
    NotFound { entity: String, id: String },

    #[error("expired: {entity} '{id}'")]
    Expired { entity: String, id: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("timeout during {operation}")]
    Timeout { operation: String },

    #[error("upstream API error ({status}): {message}")]
    ApiError {
        status: u16,
        recoverable: bool,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("MCP protocol error: {0}")]
    Mcp(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("system error: {0}")]
    System(String),
}

/// KV/Session/Credential/Client storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("not found: {entity} '{id}'")]
    NotFound { entity: String, id: String },

    #[error("conflict: compare-and-swap failed on {key}")]
    CasConflict { key: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err)
    }
}

impl From<sqlx::Error> for McpError {
    fn from(err: sqlx::Error) -> Self {
        McpError::Storage(StorageError::from(err))
    }
}

impl From<uuid::Error> for McpError {
    fn from(err: uuid::Error) -> Self {
        McpError::Storage(StorageError::UuidParse(err))
    }
}

/// Network-specific errors (upstream OAuth provider / plugin subprocess calls)
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("connection timeout")]
    Timeout,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Convenient result type for mcpforge operations
pub type Result<T> = std::result::Result<T, McpError>;

impl McpError {
    #[inline]
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        McpError::Validation {
            field: None,
            message: msg.into(),
        }
    }

    #[inline]
    pub fn validation_field<S: Into<String>>(field: S, msg: S) -> Self {
        McpError::Validation {
            field: Some(field.into()),
            message: msg.into(),
        }
    }

    #[inline]
    pub fn authentication<S: Into<String>>(error_code: &'static str, guidance: S) -> Self {
        McpError::Authentication {
            error_code,
            guidance: guidance.into(),
        }
    }

    #[inline]
    pub fn authorization(error_code: &'static str) -> Self {
        McpError::Authorization { error_code }
    }

    #[inline]
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        McpError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    #[inline]
    pub fn expired(entity: impl Into<String>, id: impl Into<String>) -> Self {
        McpError::Expired {
            entity: entity.into(),
            id: id.into(),
        }
    }

    #[inline]
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        McpError::RateLimited { retry_after_secs }
    }

    #[inline]
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        McpError::Timeout {
            operation: operation.into(),
        }
    }

    #[inline]
    pub fn api_error<S: Into<String>>(status: u16, message: S) -> Self {
        let recoverable = status == 429 || (500..600).contains(&status);
        McpError::ApiError {
            status,
            recoverable,
            message: message.into(),
        }
    }

    #[inline]
    pub fn oauth<S: Into<String>>(msg: S) -> Self {
        McpError::OAuth(msg.into())
    }

    #[inline]
    pub fn mcp<S: Into<String>>(msg: S) -> Self {
        McpError::Mcp(msg.into())
    }

    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        McpError::Config(msg.into())
    }

    #[inline]
    pub fn system<S: Into<String>>(msg: S) -> Self {
        McpError::System(msg.into())
    }

    /// Classify an error message by substring, per the workflow engine's
    /// error-classification rule: timeout/auth keywords/network status codes.
    pub fn classify_message(message: &str) -> &'static str {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            "timeout"
        } else if lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("invalid_grant")
            || lower.contains("invalid token")
        {
            "authentication"
        } else if lower.contains("429")
            || lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
            || lower.contains("network")
        {
            "api_error"
        } else {
            "system_error"
        }
    }

    /// Add context to an error, preserving the variant where possible.
    pub fn context<C: std::fmt::Display>(self, context: C) -> Self {
        match self {
            Self::Validation { field, message } => Self::Validation {
                field,
                message: format!("{}: {}", context, message),
            },
            Self::Config(msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::OAuth(msg) => Self::OAuth(format!("{}: {}", context, msg)),
            Self::Mcp(msg) => Self::Mcp(format!("{}: {}", context, msg)),
            Self::System(msg) => Self::System(format!("{}: {}", context, msg)),
            other => Self::System(format!("{}: {}", context, other)),
        }
    }
}
