// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process backends.
//!
//! [`InMemoryStore`] is a [`DurableStore`] and [`InMemoryCache`] is a
//! [`FastCache`] with per-key expiry: a read drops the expired key it hits,
//! and every [`SWEEP_EVERY`] writes the whole map is swept. Both are safe
//! to share across tasks; every trait operation on a single key is atomic
//! via the DashMap shard lock, which is never held across an await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::record::{Record, RecordPatch};
use super::traits::{DurableStore, FastCache, StorageError};

pub struct InMemoryStore {
    data: DashMap<String, Record>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all records
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn put(&self, record: &Record) -> Result<(), StorageError> {
        match self.data.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::Backend(format!(
                "Duplicate record id: {}",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update_fields(&self, id: &str, patch: &RecordPatch) -> Result<Record, StorageError> {
        let mut record = self.data.get_mut(id).ok_or(StorageError::NotFound)?;
        record.apply(patch);
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.data
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Record>, StorageError> {
        Ok(self.data.get(id).map(|r| r.value().clone()))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: &[u8], ttl: Duration) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Writes between full sweeps of expired cache entries.
pub const SWEEP_EVERY: u64 = 256;

pub struct InMemoryCache {
    data: DashMap<String, CacheEntry>,
    writes: AtomicU64,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.data.len())
    }

    /// Count a write and sweep once every [`SWEEP_EVERY`].
    /// Must not be called while holding a map reference.
    fn note_write(&self) {
        let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SWEEP_EVERY == 0 {
            self.purge_expired();
        }
    }

    /// Number of live (unexpired) entries
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| !e.is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check for a live entry without reading it
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.data.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Remaining time to live for a live entry
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.expires_at - now)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FastCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let now = Instant::now();
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.data.remove_if(key, |_, e| e.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), CacheEntry::new(value, ttl));
        self.note_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StorageError> {
        let now = Instant::now();
        let inserted = match self.data.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    slot.insert(CacheEntry::new(value, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(CacheEntry::new(value, ttl));
                true
            }
        };
        if inserted {
            self.note_write();
        }
        Ok(inserted)
    }

    async fn delete_if_matches(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError> {
        let now = Instant::now();
        let removed = self
            .data
            .remove_if(key, |_, e| !e.is_expired(now) && e.value == expected);
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(content: &str) -> Record {
        Record::new(content.to_string(), 1)
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryStore::new();
        let record = test_record("hello");

        store.put(&record).await.unwrap();

        let result = store.get_by_id(&record.id).await.unwrap();
        assert_eq!(result, Some(record));
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let store = InMemoryStore::new();

        let result = store.get_by_id("nonexistent").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_put_duplicate_id_rejected() {
        let store = InMemoryStore::new();
        let record = test_record("first");

        store.put(&record).await.unwrap();
        let result = store.put(&record).await;

        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_fields_returns_committed_row() {
        let store = InMemoryStore::new();
        let record = test_record("before");
        store.put(&record).await.unwrap();

        let patch = RecordPatch {
            content: "after".to_string(),
            updated_at: record.updated_at + 10,
        };
        let updated = store.update_fields(&record.id, &patch).await.unwrap();

        assert_eq!(updated.content, "after");
        assert_eq!(updated.updated_at, record.updated_at + 10);
        assert_eq!(updated.created_at, record.created_at);

        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = InMemoryStore::new();
        let patch = RecordPatch::content("x".to_string());

        let result = store.update_fields("missing", &patch).await;
        assert!(matches!(result, Err(StorageError::NotFound)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        let record = test_record("to-delete");

        store.put(&record).await.unwrap();
        store.delete(&record.id).await.unwrap();

        assert!(store.is_empty());
        assert!(store.get_by_id(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = InMemoryStore::new();

        let result = store.delete("nonexistent").await;
        assert!(matches!(result, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_concurrent_puts() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let record = test_record(&format!("batch-{}-item-{}", batch, i));
                    store_clone.put(&record).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }

    // --- InMemoryCache ---

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_cache_set_and_get() {
        let cache = InMemoryCache::new();

        cache.set("k", b"v", TTL).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(cache.contains("k"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_set_overwrites_and_resets_ttl() {
        let cache = InMemoryCache::new();

        cache.set("k", b"one", Duration::from_millis(50)).await.unwrap();
        cache.set("k", b"two", TTL).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(b"two".to_vec()));
        assert!(cache.ttl("k").unwrap() > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_cache_entry_expires() {
        let cache = InMemoryCache::new();

        cache.set("k", b"v", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.contains("k"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_delete() {
        let cache = InMemoryCache::new();

        cache.set("k", b"v", TTL).await.unwrap();
        cache.delete("k").await.unwrap();
        // Deleting again is fine
        cache.delete("k").await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let cache = InMemoryCache::new();

        assert!(cache.set_if_absent("k", b"first", TTL).await.unwrap());
        assert!(!cache.set_if_absent("k", b"second", TTL).await.unwrap());

        assert_eq!(cache.get("k").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_set_if_absent_after_expiry() {
        let cache = InMemoryCache::new();

        assert!(cache.set_if_absent("k", b"first", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.set_if_absent("k", b"second", TTL).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_if_matches() {
        let cache = InMemoryCache::new();
        cache.set("k", b"token-a", TTL).await.unwrap();

        assert!(!cache.delete_if_matches("k", b"token-b").await.unwrap());
        assert!(cache.contains("k"));

        assert!(cache.delete_if_matches("k", b"token-a").await.unwrap());
        assert!(!cache.contains("k"));

        assert!(!cache.delete_if_matches("k", b"token-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_matches_ignores_expired_entry() {
        let cache = InMemoryCache::new();
        cache.set("k", b"token", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!cache.delete_if_matches("k", b"token").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_set_if_absent_single_winner() {
        use std::sync::Arc;

        let cache = Arc::new(InMemoryCache::new());
        let mut handles = vec![];

        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let value = format!("holder-{}", i);
                cache.set_if_absent("lock", value.as_bytes(), TTL).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_untouched_entries() {
        let cache = InMemoryCache::new();
        cache.set("short", b"v", Duration::from_millis(10)).await.unwrap();
        cache.set("long", b"v", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.data.len(), 1);
        assert!(cache.contains("long"));
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_entries() {
        let cache = InMemoryCache::new();
        for i in 0..10 {
            cache.set(&format!("old-{}", i), b"v", Duration::from_millis(10)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Never read again, yet gone after enough writes
        for i in 10..SWEEP_EVERY {
            cache.set(&format!("new-{}", i), b"v", Duration::from_secs(60)).await.unwrap();
        }

        assert!(cache.data.iter().all(|e| !e.key().starts_with("old-")));
        assert_eq!(cache.data.len(), (SWEEP_EVERY - 10) as usize);
    }
}
