//! SQLite-backed KV store, grounded on the teacher's `storage/sqlite.rs`
//! connection-pool setup (WAL mode, busy timeout, path-traversal guard).
//!
//! Unlike the teacher, schema setup is a single `CREATE TABLE IF NOT EXISTS`
//! run at connect time rather than a `sqlx::migrate!` directory — this crate
//! has one table, not a multi-entity flow/run schema.

use super::{Key, KvEntry, KvStore, join_key};
use crate::{McpError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::path::Path;

pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    /// Connect to a SQLite-backed KV store.
    ///
    /// `dsn` is a file path (or `:memory:`); the `sqlite:` prefix and
    /// `mode=rwc` query param are added if missing.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let connection_string = if dsn.starts_with("sqlite:") {
            if dsn.contains('?') {
                dsn.to_string()
            } else {
                format!("{}?mode=rwc", dsn)
            }
        } else {
            format!("sqlite:{}?mode=rwc", dsn)
        };

        let file_path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);
        if file_path.contains("..") {
            return Err(McpError::config(
                "database path cannot contain '..' (path traversal not allowed)",
            ));
        }

        if file_path != ":memory:"
            && let Some(parent) = Path::new(file_path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect(&connection_string)
            .await
            .map_err(|e| McpError::config(format!("failed to connect to SQLite: {}", e)))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS kv_entries_prefix ON kv_entries (key)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    fn parse_entry(row: &SqliteRow) -> Result<KvEntry> {
        let key_str: String = row.try_get("key")?;
        let expires_at: Option<i64> = row.try_get("expires_at")?;
        Ok(KvEntry {
            key: key_str.split('/').map(|s| s.to_string()).collect(),
            value: row.try_get("value")?,
            expires_at: expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        })
    }

    fn is_live(expires_at: Option<i64>) -> bool {
        match expires_at {
            None => true,
            Some(ts) => Utc::now().timestamp() < ts,
        }
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let k = join_key(key);
        let row = sqlx::query("SELECT value, expires_at FROM kv_entries WHERE key = ?")
            .bind(&k)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let expires_at: Option<i64> = row.try_get("expires_at")?;
                if Self::is_live(expires_at) {
                    Ok(Some(row.try_get("value")?))
                } else {
                    sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                        .bind(&k)
                        .execute(&self.pool)
                        .await?;
                    Ok(None)
                }
            }
        }
    }

    async fn set(&self, key: &Key, value: Vec<u8>, ttl: Option<chrono::Duration>) -> Result<()> {
        let k = join_key(key);
        let expires_at = ttl.map(|d| (Utc::now() + d).timestamp());
        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(&k)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(join_key(key))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &Key,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Option<chrono::Duration>,
    ) -> Result<bool> {
        let k = join_key(key);
        let expires_at = ttl.map(|d| (Utc::now() + d).timestamp());
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT value, expires_at FROM kv_entries WHERE key = ?")
            .bind(&k)
            .fetch_optional(&mut *tx)
            .await?;

        let current: Option<Vec<u8>> = match &row {
            None => None,
            Some(row) => {
                let row_expires: Option<i64> = row.try_get("expires_at")?;
                if Self::is_live(row_expires) {
                    Some(row.try_get("value")?)
                } else {
                    None
                }
            }
        };

        if current != expected {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(&k)
        .bind(new)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_by_prefix(&self, prefix: &Key) -> Result<Vec<KvEntry>> {
        let prefix_str = join_key(prefix);
        let pattern = format!("{}%", prefix_str.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            "SELECT key, value, expires_at FROM kv_entries WHERE key LIKE ? ESCAPE '\\' ORDER BY key",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .filter(|row| {
                row.try_get::<Option<i64>, _>("expires_at")
                    .map(Self::is_live)
                    .unwrap_or(true)
            })
            .map(Self::parse_entry)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn kv() -> SqliteKv {
        SqliteKv::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let kv = kv().await;
        let k = super::super::key(&["sessions", "abc"]);
        kv.set(&k, b"hello".to_vec(), None).await.unwrap();
        assert_eq!(kv.get(&k).await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn cas_rejects_on_mismatch() {
        let kv = kv().await;
        let k = super::super::key(&["oauth", "codes", "c1"]);
        assert!(
            kv.compare_and_swap(&k, None, b"v1".to_vec(), None)
                .await
                .unwrap()
        );
        assert!(
            !kv.compare_and_swap(&k, None, b"v2".to_vec(), None)
                .await
                .unwrap()
        );
        assert!(
            kv.compare_and_swap(&k, Some(b"v1".to_vec()), b"v2".to_vec(), None)
                .await
                .unwrap()
        );
        assert_eq!(kv.get(&k).await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let kv = kv().await;
        let k = super::super::key(&["sessions", "expiring"]);
        kv.set(&k, b"v".to_vec(), Some(chrono::Duration::milliseconds(-1)))
            .await
            .unwrap();
        assert_eq!(kv.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn prefix_scan_is_ordered() {
        let kv = kv().await;
        for id in ["b", "a", "c"] {
            let k = super::super::key(&["events", "s1", id]);
            kv.set(&k, id.as_bytes().to_vec(), None).await.unwrap();
        }
        let entries = kv
            .list_by_prefix(&super::super::key(&["events", "s1"]))
            .await
            .unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.key.last().unwrap().clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
