//! In-memory KV store, grounded on the teacher's `storage/memory.rs`
//! DashMap + atomic-entry pattern.

use super::{Key, KvEntry, KvStore, join_key};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

struct StoredValue {
    key: Key,
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// DashMap-backed KV store. Default backend, and the only one used in tests.
pub struct MemoryKv {
    data: DashMap<String, StoredValue>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    fn is_live(entry: &StoredValue) -> bool {
        entry.expires_at.is_none_or(|exp| Utc::now() < exp)
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let k = join_key(key);
        match self.data.get(&k) {
            Some(entry) if Self::is_live(&entry) => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.data.remove(&k);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &Key, value: Vec<u8>, ttl: Option<chrono::Duration>) -> Result<()> {
        let k = join_key(key);
        let expires_at = ttl.map(|d| Utc::now() + d);
        self.data.insert(
            k,
            StoredValue {
                key: key.clone(),
                value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.data.remove(&join_key(key));
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
        let expires_at = ttl.map(|d| Utc::now() + d);
        match self.data.entry(k) {
            Entry::Vacant(slot) => {
                if expected.is_some() {
                    return Ok(false);
                }
                slot.insert(StoredValue {
                    key: key.clone(),
                    value: new,
                    expires_at,
                });
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                let current_live = Self::is_live(slot.get());
                let matches = if current_live {
                    expected.as_deref() == Some(slot.get().value.as_slice())
                } else {
                    expected.is_none()
                };
                if !matches {
                    return Ok(false);
                }
                slot.insert(StoredValue {
                    key: key.clone(),
                    value: new,
                    expires_at,
                });
                Ok(true)
            }
        }
    }

    async fn list_by_prefix(&self, prefix: &Key) -> Result<Vec<KvEntry>> {
        let prefix_str = join_key(prefix);
        let mut out: Vec<KvEntry> = self
            .data
            .iter()
            .filter(|entry| Self::is_live(entry.value()) && entry.key().starts_with(&prefix_str))
            .map(|entry| KvEntry {
                key: entry.value().key.clone(),
                value: entry.value().value.clone(),
                expires_at: entry.value().expires_at,
            })
            .collect();
        out.sort_by(|a, b| join_key(&a.key).cmp(&join_key(&b.key)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let kv = MemoryKv::new();
        let k = super::super::key(&["sessions", "abc"]);
        kv.set(&k, b"hello".to_vec(), None).await.unwrap();
        assert_eq!(kv.get(&k).await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn cas_rejects_on_mismatch() {
        let kv = MemoryKv::new();
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
        let kv = MemoryKv::new();
        let k = super::super::key(&["sessions", "expiring"]);
        kv.set(&k, b"v".to_vec(), Some(chrono::Duration::milliseconds(-1)))
            .await
            .unwrap();
        assert_eq!(kv.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn prefix_scan_is_ordered() {
        let kv = MemoryKv::new();
        for id in ["b", "a", "c"] {
            let k = super::super::key(&["events", "s1", id]);
            kv.set(&k, id.as_bytes().to_vec(), None).await.unwrap();
        }
        let entries = kv
            .list_by_prefix(&super::super::key(&["events", "s1"]))
            .await
            .unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.key.last().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
