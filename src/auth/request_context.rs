//! RequestContext — explicit-passing authentication context.
//!
//! Per the redesign note in spec.md §9: carried as an explicit parameter
//! through the call chain rather than via async-local/thread-local storage,
//! so request data never leaks across `tokio::spawn` boundaries.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Stdio,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub session_id: Option<String>,
    pub transport: TransportKind,
    pub authenticated_user_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Set when authentication took a side-effecting action beyond plain
    /// validation, e.g. `"third_party_token_refreshed"` (spec.md §4.6).
    pub action_taken: Option<&'static str>,
}

impl RequestContext {
    pub fn new(
        transport: TransportKind,
        authenticated_user_id: impl Into<String>,
        client_id: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: None,
            transport,
            authenticated_user_id: authenticated_user_id.into(),
            client_id: client_id.into(),
            scopes,
            start_time: Utc::now(),
            metadata: HashMap::new(),
            action_taken: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_action_taken(mut self, action: &'static str) -> Self {
        self.action_taken = Some(action);
        self
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}
