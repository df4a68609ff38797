// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis fast cache.
//!
//! Command mapping:
//!
//! | [`FastCache`] call     | Redis                                   |
//! |------------------------|-----------------------------------------|
//! | `get`                  | `GET key`                               |
//! | `set`                  | `SET key value PX ttl_ms`               |
//! | `delete`               | `DEL key`                               |
//! | `set_if_absent`        | `SET key value NX PX ttl_ms`            |
//! | `delete_if_matches`    | Lua compare-and-delete ([`COMPARE_AND_DELETE`]) |
//!
//! Reads and deletes are retried with [`RetryConfig::query`] on connection
//! errors only. The two conditional writes are single-shot: a retried
//! `SET NX` whose first reply was lost would report "not acquired" for our
//! own entry.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, AsyncCommands, Client, Script};

use super::traits::{FastCache, StorageError};
use crate::resilience::retry::{retry, retry_when, RetryConfig};

/// Deletes `KEYS[1]` only when its value equals `ARGV[1]`. Returns 1 or 0.
pub const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "myapp:" → "myapp:record:42")
    prefix: String,
    compare_and_delete: Script,
}

impl RedisCache {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix.
    ///
    /// The prefix is prepended to every key, including lock keys, so
    /// coordinators sharing a prefix share their locks.
    ///
    /// ```rust,no_run
    /// # use record_cache::storage::redis::RedisCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys become "myapp:record:{id}" and "myapp:lock:record:{id}"
    /// let cache = RedisCache::with_prefix("redis://localhost", Some("myapp:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Connection-level failures are worth another attempt; command errors are not.
fn is_transient(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl FastCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry_when("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let data: Option<Vec<u8>> = conn.get(&key).await?;
                Ok(data)
            }
        }, is_transient)
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let key = self.prefixed_key(key);

        let _: () = cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry_when("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let _: () = conn.del(&key).await?;
                Ok(())
            }
        }, is_transient)
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let key = self.prefixed_key(key);

        // Reply is "OK" when written, nil when the key already exists
        let reply: Option<String> = cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn delete_if_matches(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let key = self.prefixed_key(key);

        let removed: i64 = self
            .compare_and_delete
            .key(&key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
