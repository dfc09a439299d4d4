//! Transport Manager — selects HTTP or STDIO at startup and wires the
//! shared Session Manager, Event Store, Tool Registry, and Workflow Engine
//! into whichever is selected.
//!
//! Grounded on the teacher's `mcp/manager.rs` (`McpManager` as the single
//! owner of transport lifecycle), reapplied from "manage many upstream MCP
//! client connections" to "run this process's one server-side transport."

use crate::auth::middleware::AuthMiddlewareState;
use crate::auth::request_context::TransportKind;
use crate::auth::server::OAuthServerState;
use crate::event::EventStore;
use crate::registry::tools::ToolRegistry;
use crate::registry::workflows::WorkflowEngine;
use crate::session::SessionManager;
use crate::transport::http::HttpTransportState;
use crate::transport::router::{build_router, RouterConfig};
use crate::transport::stdio::StdioServer;
use crate::Result;
use std::sync::Arc;

pub struct TransportManagerConfig {
    pub transport: TransportKind,
    pub http_host: String,
    pub http_port: u16,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

/// Owns the transport-agnostic shared state (sessions, events, tool and
/// workflow registries) and dispatches to the configured wire transport.
pub struct TransportManager {
    config: TransportManagerConfig,
    tools: Arc<ToolRegistry>,
    workflows: Arc<WorkflowEngine>,
    sessions: Arc<SessionManager>,
    events: Arc<dyn EventStore>,
    auth: Arc<AuthMiddlewareState>,
    oauth: Arc<OAuthServerState>,
}

impl TransportManager {
    pub fn new(
        config: TransportManagerConfig,
        tools: Arc<ToolRegistry>,
        workflows: Arc<WorkflowEngine>,
        sessions: Arc<SessionManager>,
        events: Arc<dyn EventStore>,
        auth: Arc<AuthMiddlewareState>,
        oauth: Arc<OAuthServerState>,
    ) -> Self {
        Self { config, tools, workflows, sessions, events, auth, oauth }
    }

    pub async fn run(self) -> Result<()> {
        match self.config.transport {
            TransportKind::Stdio => StdioServer::new(self.tools, self.workflows).serve().await,
            TransportKind::Http => self.run_http().await,
        }
    }

    async fn run_http(self) -> Result<()> {
        let http_state = Arc::new(HttpTransportState {
            tools: self.tools,
            workflows: self.workflows,
            sessions: self.sessions,
            events: self.events,
        });

        let router = build_router(
            RouterConfig { cors_enabled: self.config.cors_enabled, cors_origins: self.config.cors_origins },
            self.oauth,
            http_state,
            self.auth,
        );

        let addr = format!("{}:{}", self.config.http_host, self.config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::McpError::config(format!("failed to bind {addr}: {e}")))?;

        tracing::info!(%addr, "MCP streamable HTTP server listening");
        axum::serve(listener, router)
            .await
            .map_err(|e| crate::McpError::system(format!("HTTP server error: {e}")))?;
        Ok(())
    }
}
