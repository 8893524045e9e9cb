//! In-memory history store and cache.

use std::{
    collections::HashMap,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use agent_replay_core::traits::{
    CacheError, Checkpoint, HistoryError, HistoryRecord, HistoryStore, ReplayCache, SessionLookup,
};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use tokio::time::Instant;

/// In-memory history store.
///
/// Useful for development, tests and single-process deployments.
/// Data is lost on restart.
pub struct MemoryHistoryStore {
    records: RwLock<HashMap<String, Vec<HistoryRecord>>>,
    checkpoints: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Append records to their sessions, creating sessions as needed.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn insert_records(
        &self,
        records: impl IntoIterator<Item = HistoryRecord>,
    ) -> Result<(), HistoryError> {
        let mut sessions = self
            .records
            .write()
            .map_err(|e| HistoryError::Internal(e.to_string()))?;

        for record in records {
            sessions
                .entry(record.session_id.clone())
                .or_default()
                .push(record);
        }

        Ok(())
    }

    /// Record a checkpoint.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn insert_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), HistoryError> {
        self.checkpoints
            .write()
            .map_err(|e| HistoryError::Internal(e.to_string()))?
            .entry(checkpoint.session_id.clone())
            .or_default()
            .push(checkpoint);

        Ok(())
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    fn records(&self, session_id: &str) -> BoxStream<'static, Result<HistoryRecord, HistoryError>> {
        let snapshot = match self.records.read() {
            Ok(sessions) => sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| HistoryError::SessionNotFound(session_id.to_string())),
            Err(e) => Err(HistoryError::Internal(e.to_string())),
        };

        match snapshot {
            Ok(records) => futures::stream::iter(records.into_iter().map(Ok)).boxed(),
            Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn checkpoints(&self, session_id: &str) -> Result<Vec<Checkpoint>, HistoryError> {
        let checkpoints = self
            .checkpoints
            .read()
            .map_err(|e| HistoryError::Internal(e.to_string()))?;

        let mut result = checkpoints.get(session_id).cloned().unwrap_or_default();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(result)
    }
}

#[async_trait]
impl SessionLookup for MemoryHistoryStore {
    async fn session_exists(&self, session_id: &str) -> Result<bool, HistoryError> {
        Ok(self
            .records
            .read()
            .map_err(|e| HistoryError::Internal(e.to_string()))?
            .contains_key(session_id))
    }
}

/// Upper bound applied to TTLs too large to represent.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Every this many writes, `set` sweeps out expired entries.
const PURGE_EVERY: usize = 64;

/// In-memory cache with per-entry expiry.
///
/// Expired entries are dropped when read, and swept periodically on write.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of stored entries, expired ones included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed.
    ///
    /// # Errors
    /// Returns error if the cache lock is poisoned.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);

        Ok(before - entries.len())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplayCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        {
            let entries = self
                .entries
                .read()
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        // Re-check: a writer may have refreshed the entry in between.
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            expires_at: now.checked_add(ttl).unwrap_or(now + MAX_TTL),
        };

        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        entries.insert(key.to_string(), entry);
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_EVERY == 0 {
            entries.retain(|_, entry| entry.expires_at > now);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_replay_core::traits::RecordKind;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_are_restartable() {
        let store = MemoryHistoryStore::new();
        store
            .insert_records([
                HistoryRecord::new("r1", RecordKind::Message, Utc::now(), "s1"),
                HistoryRecord::new("r2", RecordKind::ToolCall, Utc::now(), "s1"),
            ])
            .unwrap();

        for _ in 0..2 {
            let ids: Vec<String> = store
                .records("s1")
                .map(|r| r.unwrap().id)
                .collect()
                .await;
            assert_eq!(ids, vec!["r1", "r2"]);
        }
        assert!(store.session_exists("s1").await.unwrap());
        assert!(!store.session_exists("s2").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_session_yields_error() {
        let store = MemoryHistoryStore::new();
        let results: Vec<_> = store.records("missing").collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(HistoryError::SessionNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("k", json!({"v": 1}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"v": 1})));

        cache
            .set("other", json!(2), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.purge_expired().unwrap(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_dropped_on_read() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_expired_entries() {
        let cache = MemoryCache::new();
        for i in 0..10 {
            cache
                .set(&format!("replay:session:{i}"), json!(i), Duration::from_secs(5))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(6)).await;

        for _ in 0..PURGE_EVERY {
            cache.set("live", json!(true), Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("live").await.unwrap(), Some(json!(true)));
    }
}
