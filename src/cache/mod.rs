//! Hot cache for recently fetched batches.
//!
//! Components depend only on the narrow [`CacheBackend`] capability set
//! (`get`/`put`/`delete` with TTL plus `incr`/`expire` for counters); any
//! TTL-capable key/value service can sit behind it. [`MemoryCache`] is the
//! in-process implementation.

pub mod metrics;

pub use metrics::CacheMetrics;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::Result;
use crate::models::{CacheConfig, Item};

/// Minimal capability set expected of a cache service.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a value; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value with a TTL, overwriting atomically.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove a key if present.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increment a counter key, creating it at zero.
    async fn incr(&self, key: &str, by: u64) -> Result<u64>;

    /// Reset a key's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}

enum Slot {
    Text(String),
    Counter(u64),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-process TTL key/value store.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let value = entries.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                return None;
            }
            match &entry.slot {
                Slot::Text(text) => Some(text.clone()),
                Slot::Counter(count) => Some(count.to_string()),
            }
        });
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Text(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, by: u64) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let entry = entries.entry(key.to_string()).or_insert(Entry {
            slot: Slot::Counter(0),
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.slot = Slot::Counter(0);
            entry.expires_at = None;
        }

        let next = match entry.slot {
            Slot::Counter(count) => count + by,
            // Incrementing a text slot resets it; counters and batches
            // never share keys in practice.
            Slot::Text(_) => by,
        };
        entry.slot = Slot::Counter(next);
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

/// Serialized batch held per source.
#[derive(Debug, Serialize, Deserialize)]
struct CachedBatch {
    cached_at: DateTime<Utc>,
    items: Vec<Item>,
}

/// Source-batch cache with freshness tracking.
///
/// Freshness is `now - cached_at <= ttl`; a stale or missing entry is a
/// miss, never an error. Entries are written with double the freshness
/// TTL so a stale-but-present batch can still be observed as stale.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    fn key(source: &str) -> String {
        format!("batch:{}", source)
    }

    /// Read the cached batch for a source.
    pub async fn get(&self, source: &str) -> Result<(Vec<Item>, bool)> {
        let raw = match self.backend.get(&Self::key(source)).await? {
            Some(raw) => raw,
            None => return Ok((Vec::new(), false)),
        };

        let batch: CachedBatch = match serde_json::from_str(&raw) {
            Ok(batch) => batch,
            Err(e) => {
                // A corrupt entry is a miss; drop it so it is not re-read.
                log::warn!("Dropping corrupt cache entry for {}: {}", source, e);
                self.backend.delete(&Self::key(source)).await?;
                return Ok((Vec::new(), false));
            }
        };

        let age = Utc::now() - batch.cached_at;
        let fresh = age <= chrono::Duration::from_std(self.ttl).unwrap_or_default();
        Ok((batch.items, fresh))
    }

    /// Overwrite the cached batch for a source.
    pub async fn put(&self, source: &str, items: &[Item]) -> Result<()> {
        let batch = CachedBatch {
            cached_at: Utc::now(),
            items: items.to_vec(),
        };
        let raw = serde_json::to_string(&batch)?;
        self.backend.put(&Self::key(source), raw, self.ttl * 2).await
    }

    /// Drop the cached batch for a source.
    pub async fn invalidate(&self, source: &str) -> Result<()> {
        self.backend.delete(&Self::key(source)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::sample_item;

    fn store() -> CacheStore {
        CacheStore::new(
            Arc::new(MemoryCache::new()),
            &CacheConfig {
                ttl_secs: 1800,
                bucket_ttl_secs: 7200,
            },
        )
    }

    #[tokio::test]
    async fn test_missing_entry_is_stale_not_error() {
        let store = store();
        let (items, fresh) = store.get("rustlang").await.unwrap();
        assert!(items.is_empty());
        assert!(!fresh);
    }

    #[tokio::test]
    async fn test_put_then_get_is_fresh() {
        let store = store();
        let batch = vec![sample_item("p1", "body one"), sample_item("p2", "body two")];
        store.put("rustlang", &batch).await.unwrap();

        let (items, fresh) = store.get("rustlang").await.unwrap();
        assert!(fresh);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_item_id, "p1");
    }

    #[tokio::test]
    async fn test_put_overwrites_whole_batch() {
        let store = store();
        store
            .put("rustlang", &[sample_item("p1", "old")])
            .await
            .unwrap();
        store
            .put("rustlang", &[sample_item("p9", "new")])
            .await
            .unwrap();

        let (items, _) = store.get("rustlang").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_item_id, "p9");
    }

    #[tokio::test]
    async fn test_invalidate() {
        let store = store();
        store
            .put("rustlang", &[sample_item("p1", "body")])
            .await
            .unwrap();
        store.invalidate("rustlang").await.unwrap();

        let (items, fresh) = store.get("rustlang").await.unwrap();
        assert!(items.is_empty());
        assert!(!fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_ttl_expiry() {
        let backend = MemoryCache::new();
        backend
            .put("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counter_incr() {
        let backend = MemoryCache::new();
        assert_eq!(backend.incr("c", 2).await.unwrap(), 2);
        assert_eq!(backend.incr("c", 3).await.unwrap(), 5);
        assert_eq!(backend.get("c").await.unwrap(), Some("5".to_string()));
    }
}
