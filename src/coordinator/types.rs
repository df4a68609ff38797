// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the record coordinator.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, RecordCacheConfig};
use crate::storage::traits::StorageError;

/// Error returned by every coordinator operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record '{id}' not found")]
    NotFound { id: String },
    #[error("record '{id}' is being modified by another writer")]
    ResourceBusy { id: String },
    #[error("durable store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl RecordError {
    /// Text safe to show an end user. Carries no backend detail.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "no such record",
            Self::ResourceBusy { .. } => "try again shortly, another update is in progress",
            Self::StoreUnavailable(_) | Self::CacheUnavailable(_) => "temporarily unavailable, retry",
        }
    }

    /// Whether the same call may succeed if repeated later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }

    /// Short label for metrics.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ResourceBusy { .. } => "busy",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::CacheUnavailable(_) => "cache_unavailable",
        }
    }
}

/// Error from [`super::RecordCoordinator::connect`].
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("durable store connection failed: {0}")]
    Store(StorageError),
    #[error("cache connection failed: {0}")]
    Cache(StorageError),
}

/// Per-call deadlines applied to backend round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub store: Duration,
    pub cache: Duration,
}

impl Timeouts {
    #[must_use]
    pub fn from_config(config: &RecordCacheConfig) -> Self {
        Self {
            store: config.store_timeout(),
            cache: config.cache_timeout(),
        }
    }
}

/// Snapshot from [`super::RecordCoordinator::health_check`].
///
/// Serializes to JSON for a readiness endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// Both backends answered their probe
    pub healthy: bool,
    pub cache_connected: bool,
    /// Round-trip of the cache probe; `None` when it failed
    pub cache_latency_ms: Option<u64>,
    pub store_connected: bool,
    /// Round-trip of the store probe; `None` when it failed
    pub store_latency_ms: Option<u64>,
}
