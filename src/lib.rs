//! mcpforge - framework for building Model Context Protocol servers
//!
//! This library provides the pieces an MCP server needs beyond the wire
//! protocol itself:
//! - Dual STDIO / streamable-HTTP transport, with SSE streaming and a
//!   chunked-replay event store behind `Last-Event-ID` resumption
//! - An OAuth 2.1 authorization server, plus a consumer bridge that
//!   authenticates against an upstream provider on a user's behalf
//! - Request authentication middleware mapping failures onto RFC 6749
//!   error codes, with explicit per-request `RequestContext` propagation
//! - Tool, workflow, and plugin registries with JSON Schema validation
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpforge::config::Config;
//! use mcpforge::kv::create_kv_store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let kv = create_kv_store(&config.kv.driver).await?;
//!     let _ = kv;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod kv;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use error::{McpError, Result};

/// Initialize logging for the application.
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mcpforge=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
