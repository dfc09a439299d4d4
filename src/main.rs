//! mcpforged - MCP server launcher
//!
//! Run with: cargo run --bin mcpforged
//! Or after build: ./target/release/mcpforged
//!
//! Configuration is read from `mcpforge.config.json` (or the path named by
//! `MCPFORGE_CONFIG`) if present, then overridden by environment variables —
//! see `mcpforge::config::Config::load`.

use mcpforge::auth::client::OAuthConsumer;
use mcpforge::auth::clients::ClientRegistry;
use mcpforge::auth::credentials::CredentialStore;
use mcpforge::auth::middleware::{AuthMiddlewareState, AuthRequirement, default_requirement};
use mcpforge::auth::server::{OAuthServerConfig, OAuthServerState};
use mcpforge::auth::tokens::TokenStore;
use mcpforge::config::Config;
use mcpforge::event::KvEventStore;
use mcpforge::kv::create_kv_store;
use mcpforge::registry::{PluginManager, PluginManagerConfig, ToolRegistry, WorkflowEngine};
use mcpforge::session::SessionManager;
use mcpforge::transport::manager::{TransportManager, TransportManagerConfig};
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    mcpforge::init_logging();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "mcpforged exited with error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> mcpforge::Result<()> {
    let config = Config::load()?;

    let kv = create_kv_store(&config.kv.driver).await?;
    let tools = Arc::new(ToolRegistry::new());
    let workflows = Arc::new(WorkflowEngine::new());
    let events = Arc::new(KvEventStore::new(kv.clone()));
    let sessions = Arc::new(SessionManager::with_persistence(
        chrono::Duration::milliseconds(config.session.timeout_ms),
        std::time::Duration::from_secs(config.session.cleanup_interval_secs),
        config.session.enable_persistence.then(|| kv.clone()),
    ));

    let plugin_config = PluginManagerConfig {
        allow_list: config.plugins.allowed.clone().map(|v| v.into_iter().collect::<HashSet<_>>()),
        block_list: config.plugins.blocked.iter().cloned().collect(),
    };
    let plugins = PluginManager::new(tools.clone(), workflows.clone(), plugin_config);
    for path in &config.plugins.discovery_paths {
        if let Err(e) = plugins.load_manifest(path).await {
            tracing::warn!(path, error = %e, "plugin manifest load failed");
        }
    }

    let clients = Arc::new(ClientRegistry::new(kv.clone()));
    let tokens = Arc::new(TokenStore::new(kv.clone()));
    let credentials = Arc::new(CredentialStore::new(kv.clone()));

    let consumer = match config.oauth_consumer.clone() {
        Some(consumer_config) => {
            Some(Arc::new(OAuthConsumer::new(consumer_config.into(), credentials.clone())?))
        }
        None => None,
    };

    let oauth_state = Arc::new(OAuthServerState {
        config: OAuthServerConfig {
            issuer: config.oauth_provider.issuer.clone(),
            require_pkce: config.oauth_provider.require_pkce,
            allow_loopback_redirects: config.oauth_provider.allow_loopback_redirects,
        },
        clients,
        tokens: tokens.clone(),
        consumer: consumer.clone(),
        kv: kv.clone(),
    });

    let transport_kind = config.transport.transport_kind();
    let requirement = if config.auth.enabled {
        default_requirement(transport_kind)
    } else {
        AuthRequirement::Disabled
    };
    let auth_state = Arc::new(AuthMiddlewareState::new(
        tokens,
        config.oauth_provider.issuer.clone(),
        requirement,
        consumer,
        config.auth.session_binding_enabled,
    ));

    let manager = TransportManager::new(
        TransportManagerConfig {
            transport: transport_kind,
            http_host: config.transport.http_host.clone(),
            http_port: config.transport.http_port,
            cors_enabled: config.transport.cors_enabled,
            cors_origins: config.transport.cors_origins.clone(),
        },
        tools,
        workflows,
        sessions,
        events,
        auth_state,
        oauth_state,
    );

    manager.run().await
}
