// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record coordinator.
//!
//! The [`RecordCoordinator`] fronts a durable store with a fast cache:
//! - reads are cache-aside (hit, else load from the store and repopulate)
//! - creates populate the cache after the durable write commits
//! - updates are write-through under a [`MutationLock`]
//! - deletes evict under the same lock
//!
//! The durable store is authoritative. Cache population, write-through,
//! eviction and lock release failures are logged and swallowed; durable
//! failures and lock acquisition failures reach the caller.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use record_cache::{InMemoryCache, InMemoryStore, RecordCacheConfig, RecordCoordinator};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = RecordCoordinator::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryCache::new()),
//!     RecordCacheConfig::default(),
//! )?;
//!
//! let record = coordinator.create("hello").await?;
//! let updated = coordinator.update(&record.id, "world").await?;
//! assert_eq!(coordinator.read(&record.id).await?, updated);
//! # Ok(())
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{HealthCheck, RecordError, StartupError, Timeouts};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::{ConfigError, RecordCacheConfig};
use crate::lock::{LockAttempt, MutationLock};
use crate::record::{cache_key, Record};
use crate::storage::traits::{DurableStore, FastCache, StorageError};

/// Cache-fronted record store.
///
/// `Send + Sync`; share it behind an `Arc`. No in-process lock is held
/// across an await: writers on the same id are serialized by the
/// [`MutationLock`] in the shared cache, so several coordinators over the
/// same backends exclude each other too.
pub struct RecordCoordinator {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn FastCache>,
    lock: MutationLock,
    config: RecordCacheConfig,
    timeouts: Timeouts,
}

impl RecordCoordinator {
    /// Build over arbitrary backends. The config is validated; its URLs are ignored.
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn FastCache>,
        config: RecordCacheConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let timeouts = Timeouts::from_config(&config);
        let lock = MutationLock::new(cache.clone(), timeouts.cache);

        Ok(Self {
            store,
            cache,
            lock,
            config,
            timeouts,
        })
    }

    /// Replace the per-call deadlines.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        let guarded_ms = timeouts.store.as_millis() + 2 * timeouts.cache.as_millis();
        if self.config.lock_ttl().as_millis() <= guarded_ms {
            warn!(
                lock_ttl = ?self.config.lock_ttl(),
                store = ?timeouts.store,
                cache = ?timeouts.cache,
                "Lock TTL no longer outlasts the guarded work; a slow writer may lose its lock"
            );
        }
        self.lock = MutationLock::new(self.cache.clone(), timeouts.cache);
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RecordCacheConfig {
        &self.config
    }

    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// The lock used to serialize writers. Shares the coordinator's cache.
    #[must_use]
    pub fn lock(&self) -> &MutationLock {
        &self.lock
    }

    // ========== Deadlines ==========

    /// Per-call budget: the configured limit, cut short by the caller's deadline.
    fn budget(limit: Duration, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => limit.min(deadline.saturating_duration_since(Instant::now())),
            None => limit,
        }
    }

    async fn store_call<T, F>(
        &self,
        operation: &'static str,
        deadline: Option<Instant>,
        call: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let limit = Self::budget(self.timeouts.store, deadline);
        // A ready future would beat a zero timeout
        let outcome = if limit.is_zero() {
            None
        } else {
            tokio::time::timeout(limit, call).await.ok()
        };
        match outcome {
            Some(result) => result,
            None => {
                crate::metrics::record_timeout("store", operation);
                Err(StorageError::Backend(format!(
                    "{} timed out after {:?}",
                    operation, limit
                )))
            }
        }
    }

    async fn cache_call<T, F>(
        &self,
        operation: &'static str,
        deadline: Option<Instant>,
        call: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let limit = Self::budget(self.timeouts.cache, deadline);
        // A ready future would beat a zero timeout
        let outcome = if limit.is_zero() {
            None
        } else {
            tokio::time::timeout(limit, call).await.ok()
        };
        match outcome {
            Some(result) => result,
            None => {
                crate::metrics::record_timeout("cache", operation);
                Err(StorageError::Backend(format!(
                    "{} timed out after {:?}",
                    operation, limit
                )))
            }
        }
    }

    /// Map a durable failure to the caller-facing error.
    fn store_failure(&self, id: &str, operation: &'static str, e: StorageError) -> RecordError {
        match e {
            StorageError::NotFound => {
                debug!(id = %id, operation, "Record not found in durable store");
                crate::metrics::record_operation("store", operation, "not_found");
                RecordError::NotFound { id: id.to_string() }
            }
            StorageError::Backend(msg) => {
                error!(id = %id, operation, error = %msg, "Durable store call failed");
                crate::metrics::record_operation("store", operation, "error");
                crate::metrics::record_error("store", operation, "backend");
                RecordError::StoreUnavailable(msg)
            }
        }
    }

    // ========== Mutation lock ==========

    /// Run `guarded` while holding the lock for `id`, releasing it on every
    /// exit path. A held lock is `ResourceBusy` and `guarded` never runs.
    ///
    /// The caller's deadline bounds `guarded` only. Acquire and release use
    /// the lock's own cache timeout, so a missed deadline still releases.
    /// If the returned future is dropped mid-flight the entry is left to
    /// expire at its TTL.
    async fn with_lock<T, F, Fut>(
        &self,
        id: &str,
        operation: &'static str,
        deadline: Option<Instant>,
        guarded: F,
    ) -> Result<T, RecordError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RecordError>>,
    {
        if deadline.is_some_and(|d| d <= Instant::now()) {
            crate::metrics::record_timeout("store", operation);
            return Err(RecordError::StoreUnavailable(format!(
                "{} deadline passed before the lock was requested",
                operation
            )));
        }

        let token = match self.lock.acquire(id, self.config.lock_ttl()).await? {
            LockAttempt::Acquired(token) => token,
            LockAttempt::AlreadyHeld => {
                debug!(id = %id, operation, "Rejected: record is locked by another writer");
                return Err(RecordError::ResourceBusy { id: id.to_string() });
            }
        };

        let result = guarded().await;

        // Ok(false) is already logged by the lock
        if let Err(e) = self.lock.release(id, token).await {
            error!(
                id = %id,
                operation,
                error = %e,
                "Failed to release mutation lock; it will expire at its TTL"
            );
            crate::metrics::record_swallowed("release");
        }

        result
    }

    // ========== Best-effort cache maintenance ==========

    fn encode(record: &Record) -> Option<Vec<u8>> {
        match serde_json::to_vec(record) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(id = %record.id, error = %e, "Failed to encode record for cache");
                crate::metrics::record_swallowed("encode");
                None
            }
        }
    }

    /// Unconditional cache write. Failure is logged and swallowed.
    async fn populate(&self, record: &Record, operation: &'static str) -> bool {
        let Some(bytes) = Self::encode(record) else {
            return false;
        };

        let key = record.cache_key();
        let ttl = self.config.cache_ttl();
        match self.cache_call(operation, None, self.cache.set(&key, &bytes, ttl)).await {
            Ok(()) => {
                crate::metrics::record_operation("cache", operation, "success");
                true
            }
            Err(e) => {
                warn!(id = %record.id, operation, error = %e, "Cache write failed, continuing without it");
                crate::metrics::record_operation("cache", operation, "error");
                crate::metrics::record_swallowed(operation);
                false
            }
        }
    }

    /// Read-miss repopulation. Never overwrites an entry written since the miss.
    ///
    /// A delete can commit and evict between the store load and the insert.
    /// After a successful insert the row is re-read: if it is gone, or the
    /// re-read fails, the entry is evicted. Either the re-read sees the
    /// delete or the delete's own eviction runs after the insert.
    async fn repopulate(&self, record: &Record, deadline: Option<Instant>) {
        let Some(bytes) = Self::encode(record) else {
            return;
        };

        let key = record.cache_key();
        let ttl = self.config.cache_ttl();
        match self
            .cache_call("repopulate", deadline, self.cache.set_if_absent(&key, &bytes, ttl))
            .await
        {
            Ok(true) => crate::metrics::record_operation("cache", "repopulate", "success"),
            Ok(false) => {
                debug!(id = %record.id, "Cache already repopulated by a concurrent writer");
                crate::metrics::record_operation("cache", "repopulate", "skipped");
                return;
            }
            Err(e) => {
                warn!(id = %record.id, error = %e, "Cache repopulation failed");
                crate::metrics::record_operation("cache", "repopulate", "error");
                crate::metrics::record_swallowed("repopulate");
                return;
            }
        }

        match self
            .store_call("recheck", deadline, self.store.get_by_id(&record.id))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(id = %record.id, "Record deleted while repopulating, evicting");
                crate::metrics::record_operation("cache", "repopulate", "retracted");
                self.evict(&record.id, "repopulate_retract").await;
            }
            Err(e) => {
                warn!(id = %record.id, error = %e, "Could not confirm repopulated record, evicting");
                crate::metrics::record_operation("cache", "repopulate", "unconfirmed");
                crate::metrics::record_swallowed("recheck");
                self.evict(&record.id, "repopulate_retract").await;
            }
        }
    }

    /// Write-through after a committed update. On failure the old entry is
    /// evicted so it cannot be served for the rest of its TTL.
    async fn write_through(&self, record: &Record) {
        if !self.populate(record, "write_through").await {
            self.evict(&record.id, "write_through_evict").await;
        }
    }

    /// Best-effort removal of the cached record.
    async fn evict(&self, id: &str, operation: &'static str) -> bool {
        let key = cache_key(id);
        match self.cache_call(operation, None, self.cache.delete(&key)).await {
            Ok(()) => {
                crate::metrics::record_operation("cache", operation, "success");
                true
            }
            Err(e) => {
                error!(
                    id = %id,
                    operation,
                    error = %e,
                    "Cache eviction failed; a stale entry may be served until it expires"
                );
                crate::metrics::record_operation("cache", operation, "error");
                crate::metrics::record_swallowed(operation);
                false
            }
        }
    }
}
