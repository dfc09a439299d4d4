//! Event Store — append-only, per-stream monotonic event log backing SSE
//! replay.
//!
//! No direct teacher counterpart (the teacher delegates session/event
//! handling entirely to rmcp's session manager); built on the KV Store's
//! atomic compare-and-swap the way `storage/memory.rs` drives its own
//! sequence counters, generalized to any `KvStore` backend.

use super::chunked;
use crate::Result;
use crate::kv::{Key, KvStore, key};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: u64,
    pub stream_id: String,
    pub kind: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    kind: String,
    created_at: DateTime<Utc>,
    /// Chunk-framed payload, see `chunked::encode`.
    framed_payload: Vec<u8>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `payload` of the given `kind` to `stream_id`, returning its
    /// newly assigned, monotonically increasing event id.
    async fn append(&self, stream_id: &str, kind: &str, payload: Vec<u8>) -> Result<u64>;

    /// Replay events for `stream_id` strictly after `after_event_id`
    /// (`None` replays the whole retained history), in id order.
    async fn replay(&self, stream_id: &str, after_event_id: Option<u64>) -> Result<Vec<StoredEvent>>;

    /// The highest event id currently retained for `stream_id`, if any.
    async fn last_event_id(&self, stream_id: &str) -> Result<Option<u64>>;

    async fn list_streams(&self) -> Result<Vec<String>>;

    /// Drop all but the most recent `keep_last_n` events for `stream_id`.
    async fn cleanup_old_events(&self, stream_id: &str, keep_last_n: usize) -> Result<()>;
}

fn counter_key(stream_id: &str) -> Key {
    key(&["events", stream_id, "_seq"])
}

fn event_key(stream_id: &str, id: u64) -> Key {
    key(&["events", stream_id, "entries", &format!("{:020}", id)])
}

fn event_prefix(stream_id: &str) -> Key {
    key(&["events", stream_id, "entries"])
}

fn stream_index_key(stream_id: &str) -> Key {
    key(&["events", "_streams", stream_id])
}

fn parse_event_id(entry_key: &[String]) -> Option<u64> {
    entry_key.last()?.parse().ok()
}

/// `EventStore` backed by any `KvStore`. Event ids are assigned via a CAS
/// loop against a per-stream counter key, so they stay monotonic even
/// across restarts or multiple writers sharing a durable backend.
pub struct KvEventStore {
    kv: Arc<dyn KvStore>,
}

impl KvEventStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn next_id(&self, stream_id: &str) -> Result<u64> {
        let ck = counter_key(stream_id);
        loop {
            let current = self.kv.get(&ck).await?;
            let current_val: u64 = match &current {
                Some(bytes) => std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                None => 0,
            };
            let next_val = current_val + 1;
            let ok = self
                .kv
                .compare_and_swap(&ck, current.clone(), next_val.to_string().into_bytes(), None)
                .await?;
            if ok {
                return Ok(next_val);
            }
        }
    }

    async fn mark_stream(&self, stream_id: &str) -> Result<()> {
        self.kv
            .set(&stream_index_key(stream_id), stream_id.as_bytes().to_vec(), None)
            .await
    }
}

#[async_trait]
impl EventStore for KvEventStore {
    async fn append(&self, stream_id: &str, kind: &str, payload: Vec<u8>) -> Result<u64> {
        let id = self.next_id(stream_id).await?;
        let record = StoredRecord {
            kind: kind.to_string(),
            created_at: Utc::now(),
            framed_payload: chunked::encode(&payload)?,
        };
        self.kv
            .set(&event_key(stream_id, id), serde_json::to_vec(&record)?, None)
            .await?;
        self.mark_stream(stream_id).await?;
        Ok(id)
    }

    async fn replay(&self, stream_id: &str, after_event_id: Option<u64>) -> Result<Vec<StoredEvent>> {
        let entries = self.kv.list_by_prefix(&event_prefix(stream_id)).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(id) = parse_event_id(&entry.key) else {
                continue;
            };
            if after_event_id.is_some_and(|after| id <= after) {
                continue;
            }
            let record: StoredRecord = serde_json::from_slice(&entry.value)?;
            out.push(StoredEvent {
                id,
                stream_id: stream_id.to_string(),
                kind: record.kind,
                payload: chunked::decode(&record.framed_payload)?,
                created_at: record.created_at,
            });
        }
        out.sort_by_key(|e| e.id);
        Ok(out)
    }

    async fn last_event_id(&self, stream_id: &str) -> Result<Option<u64>> {
        let entries = self.kv.list_by_prefix(&event_prefix(stream_id)).await?;
        Ok(entries.iter().filter_map(|e| parse_event_id(&e.key)).max())
    }

    async fn list_streams(&self) -> Result<Vec<String>> {
        let entries = self.kv.list_by_prefix(&key(&["events", "_streams"])).await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| String::from_utf8(e.value).ok())
            .collect())
    }

    async fn cleanup_old_events(&self, stream_id: &str, keep_last_n: usize) -> Result<()> {
        let mut entries = self.kv.list_by_prefix(&event_prefix(stream_id)).await?;
        if entries.len() <= keep_last_n {
            return Ok(());
        }
        entries.sort_by_key(|e| parse_event_id(&e.key).unwrap_or(0));
        let drop_count = entries.len() - keep_last_n;
        for entry in entries.into_iter().take(drop_count) {
            self.kv.delete(&entry.key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn store() -> KvEventStore {
        KvEventStore::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn append_assigns_monotonic_ids() {
        let store = store();
        let id1 = store.append("s1", "message", b"a".to_vec()).await.unwrap();
        let id2 = store.append("s1", "message", b"b".to_vec()).await.unwrap();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[tokio::test]
    async fn replay_returns_events_after_cursor_in_order() {
        let store = store();
        for payload in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
            store.append("s1", "message", payload).await.unwrap();
        }
        let events = store.replay("s1", Some(1)).await.unwrap();
        let payloads: Vec<_> = events.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(payloads, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn replay_none_returns_full_history() {
        let store = store();
        store.append("s1", "message", b"a".to_vec()).await.unwrap();
        store.append("s1", "message", b"b".to_vec()).await.unwrap();
        assert_eq!(store.replay("s1", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cleanup_retains_only_last_n() {
        let store = store();
        for payload in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
            store.append("s1", "message", payload).await.unwrap();
        }
        store.cleanup_old_events("s1", 1).await.unwrap();
        let events = store.replay("s1", None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, b"c".to_vec());
    }

    #[tokio::test]
    async fn list_streams_tracks_distinct_streams() {
        let store = store();
        store.append("s1", "message", b"a".to_vec()).await.unwrap();
        store.append("s2", "message", b"b".to_vec()).await.unwrap();
        let mut streams = store.list_streams().await.unwrap();
        streams.sort();
        assert_eq!(streams, vec!["s1".to_string(), "s2".to_string()]);
    }
}
