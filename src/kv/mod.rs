//! KV Store — ordered key-value persistence with prefix scans, TTLs, and
//! atomic compare-and-swap.
//!
//! Every other durable store in this crate (Session Store, Credential
//! Store, Client Registry, Event Store) is built on top of `KvStore`.

pub mod memory;
pub mod sqlite;

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

/// A key is an ordered path of string segments, joined with `/` on the wire.
pub type Key = Vec<String>;

pub fn key(segments: &[&str]) -> Key {
    segments.iter().map(|s| s.to_string()).collect()
}

fn join_key(k: &[String]) -> String {
    k.join("/")
}

#[derive(Debug, Clone)]
pub struct KvEntry {
    pub key: Key,
    pub value: Vec<u8>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Ordered key-value store with optional TTL and atomic CAS.
///
/// Guarantees: single-writer linearizability per key; prefix scans return a
/// consistent snapshot for each key at the time it is read.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &Key, value: Vec<u8>, ttl: Option<chrono::Duration>) -> Result<()>;

    async fn delete(&self, key: &Key) -> Result<()>;

    /// Atomically set `key` to `new` only if its current value equals
    /// `expected` (None means "key must not exist"). Returns `Ok(true)` on
    /// success, `Ok(false)` on CAS mismatch.
    async fn compare_and_swap(
        &self,
        key: &Key,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Option<chrono::Duration>,
    ) -> Result<bool>;

    /// List all entries whose key starts with `prefix`, in key order.
    async fn list_by_prefix(&self, prefix: &Key) -> Result<Vec<KvEntry>>;
}

/// Create a `KvStore` from a driver string ("memory" or "sqlite:<path>"),
/// following the teacher's `create_storage_from_config` dispatch pattern.
pub async fn create_kv_store(driver: &str) -> Result<std::sync::Arc<dyn KvStore>> {
    if driver == "memory" || driver.is_empty() {
        Ok(std::sync::Arc::new(MemoryKv::new()))
    } else if let Some(dsn) = driver.strip_prefix("sqlite:") {
        Ok(std::sync::Arc::new(SqliteKv::connect(dsn).await?))
    } else {
        Err(crate::McpError::config(format!(
            "unsupported KV driver: {}",
            driver
        )))
    }
}
