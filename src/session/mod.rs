//! Session Manager — MCP transport-bound sessions.
//!
//! Generalized from the teacher's cookie-based `http/session.rs`
//! (`SessionStore`, 5-minute cleanup tick, `RwLock<HashMap>`) to
//! transport-bound MCP sessions: a session is created at `initialize`,
//! validated on every subsequent request (existence, transport match, not
//! expired), and evicted by a cleanup ticker rather than cookie `Max-Age`.
//!
//! The active set lives in memory, but every create/evict is written
//! through to the KV Store (when persistence is configured) so a session
//! the ticker has already dropped from memory can still be reported as
//! `Expired` rather than `Unknown` — the KV record outlives the in-memory
//! entry by `DEFAULT_SESSION_TOMBSTONE_RETENTION_SECS`.

use crate::constants::{DEFAULT_SESSION_TOMBSTONE_RETENTION_SECS, KV_PREFIX_SESSIONS};
use crate::kv::{KvStore, key};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    Http,
    Stdio,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub transport: Transport,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub max_age: Duration,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.last_active_at + self.max_age < now
    }
}

/// Outcome of validating a session id against the active set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    Active(String),
    /// Known to have existed, but evicted by the cleanup ticker or expiry —
    /// the client should re-initialize rather than treat this as "unknown".
    Expired,
    Unknown,
}

/// The write-through record for one session. `max_age` doesn't survive
/// chrono's `Duration` serialization, so it's flattened to milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    transport: Transport,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    max_age_ms: i64,
    /// Set when the in-memory entry has been evicted (expiry or cleanup
    /// ticker); the record itself lingers briefly so a racing lookup still
    /// resolves to `Expired`.
    tombstoned: bool,
}

impl PersistedSession {
    fn from_session(session: &Session, tombstoned: bool) -> Self {
        Self {
            transport: session.transport,
            created_at: session.created_at,
            last_active_at: session.last_active_at,
            max_age_ms: session.max_age.num_milliseconds(),
            tombstoned,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.last_active_at + Duration::milliseconds(self.max_age_ms) < now
    }
}

fn session_key(session_id: &str) -> crate::kv::Key {
    key(&[KV_PREFIX_SESSIONS, session_id])
}

/// In-memory active-session set with a cleanup ticker, write-through
/// persisted to an optional KV Store. Construct once per process and
/// share via `Arc`/`clone()`.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    default_max_age: Duration,
    persist: Option<Arc<dyn KvStore>>,
}

impl SessionManager {
    /// In-memory only, no write-through persistence.
    pub fn new(default_max_age: Duration, cleanup_interval: std::time::Duration) -> Self {
        Self::with_persistence(default_max_age, cleanup_interval, None)
    }

    pub fn with_persistence(
        default_max_age: Duration,
        cleanup_interval: std::time::Duration,
        kv: Option<Arc<dyn KvStore>>,
    ) -> Self {
        let manager = Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            default_max_age,
            persist: kv,
        };
        let background = manager.clone();
        tokio::spawn(async move { background.cleanup_loop(cleanup_interval).await });
        manager
    }

    pub fn create_session(&self, transport: Transport) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            transport,
            created_at: now,
            last_active_at: now,
            max_age: self.default_max_age,
        };
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        self.write_through(&session, false, None);
        session
    }

    /// Validate `session_id` for `transport`, touching `last_active_at` on
    /// success. A session that existed but is now expired reports
    /// `SessionLookup::Expired` rather than `Unknown` so the HTTP layer can
    /// distinguish "re-initialize" from "this id was never valid" — even
    /// once the cleanup ticker has already dropped it from memory, via the
    /// persisted tombstone.
    pub async fn validate(&self, session_id: &str, transport: Transport) -> SessionLookup {
        let now = Utc::now();
        {
            let mut sessions = self.sessions.write();
            if let Some(session) = sessions.get_mut(session_id) {
                if session.is_expired(now) {
                    let evicted = session.clone();
                    sessions.remove(session_id);
                    drop(sessions);
                    self.write_through(&evicted, true, None);
                    return SessionLookup::Expired;
                }
                if session.transport != transport {
                    return SessionLookup::Unknown;
                }
                session.last_active_at = now;
                return SessionLookup::Active(session_id.to_string());
            }
        }
        self.lookup_persisted(session_id, now).await
    }

    async fn lookup_persisted(&self, session_id: &str, now: DateTime<Utc>) -> SessionLookup {
        let Some(kv) = &self.persist else {
            return SessionLookup::Unknown;
        };
        let Ok(Some(bytes)) = kv.get(&session_key(session_id)).await else {
            return SessionLookup::Unknown;
        };
        match serde_json::from_slice::<PersistedSession>(&bytes) {
            Ok(record) if record.tombstoned || record.is_expired(now) => SessionLookup::Expired,
            _ => SessionLookup::Unknown,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Idempotent: deleting an unknown session is not an error. Clears the
    /// persisted record outright rather than tombstoning it — an explicit
    /// DELETE is not the "re-initialize" case the tombstone exists for, and
    /// subsequent lookups should report `Unknown`.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        if let Some(kv) = &self.persist {
            kv.delete(&session_key(session_id)).await?;
        }
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn write_through(&self, session: &Session, tombstoned: bool, ttl: Option<Duration>) {
        let Some(kv) = self.persist.clone() else {
            return;
        };
        let record = PersistedSession::from_session(session, tombstoned);
        let Ok(bytes) = serde_json::to_vec(&record) else {
            return;
        };
        let ttl = ttl.or(if tombstoned {
            Some(Duration::seconds(DEFAULT_SESSION_TOMBSTONE_RETENTION_SECS))
        } else {
            None
        });
        let id = session.id.clone();
        tokio::spawn(async move {
            if let Err(e) = kv.set(&session_key(&id), bytes, ttl).await {
                tracing::warn!(session_id = %id, error = %e, "session persistence write failed");
            }
        });
    }

    async fn cleanup_loop(&self, interval: std::time::Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let now = Utc::now();
            let evicted: Vec<Session> = {
                let mut sessions = self.sessions.write();
                let mut gone = Vec::new();
                sessions.retain(|_, s| {
                    if s.is_expired(now) {
                        gone.push(s.clone());
                        false
                    } else {
                        true
                    }
                });
                gone
            };
            for session in &evicted {
                self.write_through(session, true, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Duration::minutes(30), std::time::Duration::from_secs(300))
    }

    #[tokio::test]
    async fn create_and_validate() {
        let mgr = manager();
        let session = mgr.create_session(Transport::Http);
        assert_eq!(
            mgr.validate(&session.id, Transport::Http).await,
            SessionLookup::Active(session.id.clone())
        );
    }

    #[tokio::test]
    async fn wrong_transport_is_unknown() {
        let mgr = manager();
        let session = mgr.create_session(Transport::Http);
        assert_eq!(
            mgr.validate(&session.id, Transport::Stdio).await,
            SessionLookup::Unknown
        );
    }

    #[tokio::test]
    async fn unknown_session_id_is_unknown() {
        let mgr = manager();
        assert_eq!(mgr.validate("nonexistent", Transport::Http).await, SessionLookup::Unknown);
    }

    #[tokio::test]
    async fn expired_session_reports_expired_then_unknown() {
        let mgr = SessionManager::new(Duration::milliseconds(-1), std::time::Duration::from_secs(300));
        let session = mgr.create_session(Transport::Http);
        assert_eq!(mgr.validate(&session.id, Transport::Http).await, SessionLookup::Expired);
        assert_eq!(mgr.validate(&session.id, Transport::Http).await, SessionLookup::Unknown);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let mgr = manager();
        let session = mgr.create_session(Transport::Http);
        mgr.delete(&session.id).await.unwrap();
        mgr.delete(&session.id).await.unwrap();
        assert_eq!(mgr.validate(&session.id, Transport::Http).await, SessionLookup::Unknown);
    }

    #[tokio::test]
    async fn touching_active_session_extends_last_active_at() {
        let mgr = manager();
        let session = mgr.create_session(Transport::Http);
        let before = mgr.get(&session.id).unwrap().last_active_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        mgr.validate(&session.id, Transport::Http).await;
        let after = mgr.get(&session.id).unwrap().last_active_at;
        assert!(after >= before);
    }

    /// Regression: once the in-memory entry is gone, a persisted tombstone
    /// still distinguishes "expired" from "never existed".
    #[tokio::test]
    async fn expiry_survives_in_memory_eviction_via_persisted_tombstone() {
        let kv = Arc::new(crate::kv::MemoryKv::new());
        let mgr = SessionManager::with_persistence(
            Duration::milliseconds(-1),
            std::time::Duration::from_secs(300),
            Some(kv.clone()),
        );
        let session = mgr.create_session(Transport::Http);
        assert_eq!(mgr.validate(&session.id, Transport::Http).await, SessionLookup::Expired);

        // The in-memory entry is gone now; give the write-through task a
        // moment to land the tombstone, then look the id up fresh.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(mgr.validate(&session.id, Transport::Http).await, SessionLookup::Expired);
    }
}
