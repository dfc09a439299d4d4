//! Authorization: the MCP server's own OAuth 2.1 authorization surface,
//! the consumer that authenticates against upstream providers on a user's
//! behalf, and the registries/stores both sides share.
//!
//! - **server**: OAuth 2.1 authorization server (RFC 7591/8414/9728/7009/7662)
//! - **client**: OAuth Consumer — authorization code flow against one
//!   configured upstream provider
//! - **middleware**: request authentication, path allowlisting, scope checks
//! - **clients** / **tokens** / **credentials**: KV-backed registries
//! - **request_context**: explicit per-request authentication context

pub mod client;
pub mod clients;
pub mod credentials;
pub mod middleware;
pub mod request_context;
pub mod server;
pub mod tokens;

pub use client::{ExchangedTokens, OAuthConsumer, UpstreamProviderConfig};
pub use clients::{Client, ClientRegistry};
pub use credentials::{CredentialStore, UpstreamCredential};
pub use middleware::{AuthMiddlewareState, AuthRequirement, authenticate, default_requirement};
pub use request_context::{RequestContext, TransportKind};
pub use server::{OAuthServerConfig, OAuthServerState, create_oauth_routes};
pub use tokens::{AccessToken, AuthorizationCode, RefreshToken, TokenStore};
