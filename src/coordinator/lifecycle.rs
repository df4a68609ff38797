// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bootstrap against real backends, and live health probes.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::{HealthCheck, RecordCoordinator, StartupError};
use crate::config::{ConfigError, RecordCacheConfig};
use crate::storage::redis::RedisCache;
use crate::storage::sql::SqlStore;
use crate::storage::traits::StorageError;

impl RecordCoordinator {
    /// Connect to SQL and Redis from `config` and build a coordinator.
    ///
    /// Startup order:
    /// 1. Validate config (both URLs required)
    /// 2. Connect SQL (ground truth); creates the `records` table if missing
    /// 3. Connect Redis (cache and lock host), applying `redis_prefix`
    ///
    /// Both connections use startup retry, so a wrong URL fails after a few
    /// seconds rather than hanging.
    #[tracing::instrument(skip(config))]
    pub async fn connect(config: RecordCacheConfig) -> Result<Self, StartupError> {
        let startup_start = Instant::now();
        config.validate_for_connect()?;
        let sql_url = config
            .sql_url
            .clone()
            .ok_or(ConfigError::Missing { field: "sql_url" })?;
        let redis_url = config
            .redis_url
            .clone()
            .ok_or(ConfigError::Missing { field: "redis_url" })?;

        // ========== PHASE 1: Durable store ==========
        let phase_start = Instant::now();
        let backend = if sql_url.starts_with("sqlite:") { "sqlite" } else { "mysql" };
        info!(backend, "Connecting to durable store...");
        let store = match SqlStore::with_max_connections(&sql_url, config.sql_max_connections).await {
            Ok(store) => {
                crate::metrics::set_backend_healthy("sql", true);
                crate::metrics::record_startup_phase("sql_connect", phase_start.elapsed());
                info!(backend, "Durable store connected");
                store
            }
            Err(e) => {
                error!(backend, error = %e, "Failed to connect to durable store");
                crate::metrics::set_backend_healthy("sql", false);
                crate::metrics::record_connection_error("sql");
                return Err(StartupError::Store(e));
            }
        };

        // ========== PHASE 2: Fast cache ==========
        let phase_start = Instant::now();
        info!(prefix = ?config.redis_prefix, "Connecting to Redis...");
        let cache = match RedisCache::with_prefix(&redis_url, config.redis_prefix.as_deref()).await {
            Ok(cache) => {
                crate::metrics::set_backend_healthy("redis", true);
                crate::metrics::record_startup_phase("redis_connect", phase_start.elapsed());
                info!("Redis connected");
                cache
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to Redis");
                crate::metrics::set_backend_healthy("redis", false);
                crate::metrics::record_connection_error("redis");
                return Err(StartupError::Cache(e));
            }
        };

        let coordinator = Self::new(Arc::new(store), Arc::new(cache), config)?;
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(elapsed = ?startup_start.elapsed(), "Record coordinator ready");
        Ok(coordinator)
    }

    /// Probe both backends concurrently.
    ///
    /// Each probe runs under the same deadline as regular calls to that
    /// backend. Also updates the `record_cache_backend_healthy` gauge.
    pub async fn health_check(&self) -> HealthCheck {
        let (cache, store) = tokio::join!(
            probe("cache", self.timeouts.cache, self.cache.ping()),
            probe("store", self.timeouts.store, self.store.ping())
        );

        let (cache_connected, cache_latency_ms) = cache;
        let (store_connected, store_latency_ms) = store;

        HealthCheck {
            healthy: cache_connected && store_connected,
            cache_connected,
            cache_latency_ms,
            store_connected,
            store_latency_ms,
        }
    }
}

async fn probe<F>(backend: &'static str, deadline: Duration, ping: F) -> (bool, Option<u64>)
where
    F: Future<Output = Result<(), StorageError>>,
{
    let start = Instant::now();
    let connected = match tokio::time::timeout(deadline, ping).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(backend, error = %e, "Health probe failed");
            false
        }
        Err(_) => {
            warn!(backend, timeout = ?deadline, "Health probe timed out");
            false
        }
    };
    crate::metrics::set_backend_healthy(backend, connected);

    if connected {
        (true, Some(start.elapsed().as_millis() as u64))
    } else {
        (false, None)
    }
}
