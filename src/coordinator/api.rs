// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record operations: create, read, update, delete.
//!
//! Each operation has a `*_with_deadline` twin. The deadline caps every
//! store and cache call the operation makes on the caller's behalf and a
//! missed deadline surfaces as [`RecordError::StoreUnavailable`]. Lock
//! release and post-commit cache maintenance keep their configured
//! timeouts, so they still run once the deadline has passed. Prefer these
//! over wrapping an operation in `tokio::time::timeout`: a dropped future
//! leaves its lock held until the TTL expires.

use tokio::time::Instant;
use tracing::{debug, info, warn, Span};

use super::{RecordCoordinator, RecordError};
use crate::metrics::LatencyTimer;
use crate::record::{cache_key, Record, RecordPatch};

impl RecordCoordinator {
    fn finish<T>(operation: &'static str, result: Result<T, RecordError>) -> Result<T, RecordError> {
        match &result {
            Ok(_) => crate::metrics::record_operation("all", operation, "success"),
            Err(e) => crate::metrics::record_operation("all", operation, e.kind()),
        }
        result
    }

    /// Persist a new record and cache it.
    ///
    /// The durable write is surfaced as [`RecordError::StoreUnavailable`] on
    /// failure and nothing is cached. A failed cache write is only logged.
    pub async fn create(&self, content: impl Into<String>) -> Result<Record, RecordError> {
        self.create_within(content.into(), None).await
    }

    /// [`create`](Self::create) with every durable call bounded by `deadline`.
    pub async fn create_with_deadline(
        &self,
        content: impl Into<String>,
        deadline: Instant,
    ) -> Result<Record, RecordError> {
        self.create_within(content.into(), Some(deadline)).await
    }

    /// Cache-aside read.
    ///
    /// Cache errors, timeouts and undecodable entries fall through to the
    /// durable store. A miss repopulates the cache without overwriting a
    /// value a concurrent writer stored in the meantime.
    pub async fn read(&self, id: &str) -> Result<Record, RecordError> {
        self.read_within(id, None).await
    }

    /// [`read`](Self::read) with every cache and store call bounded by `deadline`.
    pub async fn read_with_deadline(&self, id: &str, deadline: Instant) -> Result<Record, RecordError> {
        self.read_within(id, Some(deadline)).await
    }

    /// Replace the record's content under the mutation lock and return the
    /// committed record.
    ///
    /// Fails fast with [`RecordError::ResourceBusy`] when another writer
    /// holds the lock. On a durable failure the cache is left untouched.
    pub async fn update(&self, id: &str, content: impl Into<String>) -> Result<Record, RecordError> {
        self.update_within(id, content.into(), None).await
    }

    /// [`update`](Self::update) with the durable write bounded by `deadline`.
    /// The lock is released even when the deadline is missed.
    pub async fn update_with_deadline(
        &self,
        id: &str,
        content: impl Into<String>,
        deadline: Instant,
    ) -> Result<Record, RecordError> {
        self.update_within(id, content.into(), Some(deadline)).await
    }

    /// Remove the record under the mutation lock and evict it from the cache.
    pub async fn delete(&self, id: &str) -> Result<(), RecordError> {
        self.delete_within(id, None).await
    }

    /// [`delete`](Self::delete) with the durable delete bounded by `deadline`.
    /// The lock is released even when the deadline is missed.
    pub async fn delete_with_deadline(&self, id: &str, deadline: Instant) -> Result<(), RecordError> {
        self.delete_within(id, Some(deadline)).await
    }

    #[tracing::instrument(name = "create", skip(self, content), fields(id))]
    async fn create_within(&self, content: String, deadline: Option<Instant>) -> Result<Record, RecordError> {
        let _timer = LatencyTimer::new("all", "create");
        let record = Record::new(content, self.config.default_status);
        Span::current().record("id", record.id.as_str());

        let result = match self.store_call("put", deadline, self.store.put(&record)).await {
            Ok(()) => {
                crate::metrics::record_operation("store", "create", "success");
                self.populate(&record, "populate").await;
                info!(id = %record.id, "Record created");
                Ok(record)
            }
            Err(e) => Err(self.store_failure(&record.id, "create", e)),
        };

        Self::finish("create", result)
    }

    #[tracing::instrument(name = "read", skip(self), fields(tier))]
    async fn read_within(&self, id: &str, deadline: Option<Instant>) -> Result<Record, RecordError> {
        let _timer = LatencyTimer::new("all", "read");
        let key = cache_key(id);

        match self.cache_call("read", deadline, self.cache.get(&key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Record>(&bytes) {
                Ok(record) if record.id == id => {
                    Span::current().record("tier", "cache");
                    crate::metrics::record_operation("cache", "read", "hit");
                    debug!(id = %id, "Served from cache");
                    return Self::finish("read", Ok(record));
                }
                Ok(record) => {
                    warn!(id = %id, cached_id = %record.id, "Cache entry holds a different record, ignoring it");
                    self.discard_corrupt(id).await;
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Corrupt cache entry, falling back to durable store");
                    self.discard_corrupt(id).await;
                }
            },
            Ok(None) => {
                crate::metrics::record_operation("cache", "read", "miss");
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Cache read failed, falling back to durable store");
                crate::metrics::record_operation("cache", "read", "error");
                crate::metrics::record_swallowed("read");
            }
        }

        Span::current().record("tier", "store");
        let result = match self
            .store_call("get_by_id", deadline, self.store.get_by_id(id))
            .await
        {
            Ok(Some(record)) => {
                crate::metrics::record_operation("store", "read", "hit");
                self.repopulate(&record, deadline).await;
                Ok(record)
            }
            Ok(None) => {
                crate::metrics::record_operation("store", "read", "not_found");
                Err(RecordError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(self.store_failure(id, "read", e)),
        };

        Self::finish("read", result)
    }

    #[tracing::instrument(name = "update", skip(self, content))]
    async fn update_within(
        &self,
        id: &str,
        content: String,
        deadline: Option<Instant>,
    ) -> Result<Record, RecordError> {
        let _timer = LatencyTimer::new("all", "update");

        let result = self
            .with_lock(id, "update", deadline, move || async move {
                // Stamped after the lock is ours
                let patch = RecordPatch::content(content);
                let record = self
                    .store_call("update_fields", deadline, self.store.update_fields(id, &patch))
                    .await
                    .map_err(|e| self.store_failure(id, "update", e))?;

                crate::metrics::record_operation("store", "update", "success");
                self.write_through(&record).await;
                info!(id = %id, "Record updated");
                Ok::<_, RecordError>(record)
            })
            .await;

        Self::finish("update", result)
    }

    #[tracing::instrument(name = "delete", skip(self))]
    async fn delete_within(&self, id: &str, deadline: Option<Instant>) -> Result<(), RecordError> {
        let _timer = LatencyTimer::new("all", "delete");

        let result = self
            .with_lock(id, "delete", deadline, move || async move {
                self.store_call("delete", deadline, self.store.delete(id))
                    .await
                    .map_err(|e| self.store_failure(id, "delete", e))?;

                crate::metrics::record_operation("store", "delete", "success");
                self.evict(id, "evict").await;
                info!(id = %id, "Record deleted");
                Ok::<_, RecordError>(())
            })
            .await;

        Self::finish("delete", result)
    }

    /// Drop an unusable cache entry so the repopulation that follows can land.
    async fn discard_corrupt(&self, id: &str) {
        crate::metrics::record_operation("cache", "read", "corrupt");
        crate::metrics::record_swallowed("decode");
        self.evict(id, "discard_corrupt").await;
    }
}
