// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend contracts consumed by the coordinator.
//!
//! - [`DurableStore`]: transactional source of truth, keyed by record id.
//! - [`FastCache`]: expiring key-value accelerator. Also hosts the mutation
//!   lock entries, so it must provide the two conditional primitives
//!   (`set_if_absent`, `delete_if_matches`) atomically.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{Record, RecordPatch};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn backend(e: impl std::fmt::Display) -> Self {
        StorageError::Backend(e.to_string())
    }
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert a new record in a single transaction.
    async fn put(&self, record: &Record) -> Result<(), StorageError>;

    /// Apply `patch` to the record in a single transaction and return the
    /// committed row. `NotFound` if the id has no live record.
    async fn update_fields(&self, id: &str, patch: &RecordPatch) -> Result<Record, StorageError>;

    /// Remove the record. `NotFound` if the id has no live record.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Record>, StorageError>;

    /// Connectivity probe for health checks.
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[async_trait]
pub trait FastCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Unconditional write with expiration.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Write only if `key` is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StorageError>;

    /// Delete `key` only if its current value equals `expected`.
    /// Returns whether an entry was removed.
    async fn delete_if_matches(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError>;

    /// Connectivity probe for health checks.
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
