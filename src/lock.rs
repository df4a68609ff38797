// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mutation lock: TTL-bound, token-verified mutual exclusion per record id.
//!
//! The lock lives in the shared [`FastCache`], never in process memory, so
//! it serializes writers across every coordinator instance that shares the
//! cache.
//!
//! ```text
//! Unlocked ── acquire() ──→ Locked ── release(token) ──→ Unlocked
//!                             │
//!                        TTL expiry ──→ Unlocked
//! ```
//!
//! - `acquire` is a single `set_if_absent` attempt with a fresh random token.
//!   It never waits or retries. A timed-out attempt counts as already held.
//! - `release` is `delete_if_matches(key, token)`: a holder whose TTL ran out
//!   cannot remove a lock that someone else has since acquired.
//! - [`LockToken`] is not `Clone` and `release` consumes it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::coordinator::RecordError;
use crate::storage::traits::FastCache;

/// Cache key namespace for lock entries.
pub const LOCK_KEY_PREFIX: &str = "lock:record:";

/// Lock key for a record id: `lock:record:{id}`.
#[must_use]
pub fn lock_key(id: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, id)
}

/// Capability proving a successful `acquire`.
#[derive(Debug)]
pub struct LockToken {
    value: String,
    acquired_at: Instant,
}

impl LockToken {
    fn generate() -> Self {
        Self {
            value: uuid::Uuid::new_v4().to_string(),
            acquired_at: Instant::now(),
        }
    }

    /// The opaque value stored in the lock entry.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Time since the lock was acquired.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Outcome of a single acquisition attempt.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(LockToken),
    AlreadyHeld,
}

impl LockAttempt {
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAttempt::Acquired(_))
    }
}

pub struct MutationLock {
    cache: Arc<dyn FastCache>,
    call_timeout: Duration,
}

impl MutationLock {
    /// `call_timeout` bounds each cache round-trip made by the lock.
    pub fn new(cache: Arc<dyn FastCache>, call_timeout: Duration) -> Self {
        Self {
            cache,
            call_timeout,
        }
    }

    /// Try once to take the lock for `id`, expiring after `ttl`.
    ///
    /// Returns `AlreadyHeld` when another holder has it or when the cache
    /// did not answer within the call timeout. A cache error surfaces as
    /// [`RecordError::CacheUnavailable`].
    pub async fn acquire(&self, id: &str, ttl: Duration) -> Result<LockAttempt, RecordError> {
        let key = lock_key(id);
        let token = LockToken::generate();

        let attempt = tokio::time::timeout(
            self.call_timeout,
            self.cache.set_if_absent(&key, token.value.as_bytes(), ttl),
        )
        .await;

        match attempt {
            Ok(Ok(true)) => {
                debug!(id = %id, "Mutation lock acquired");
                crate::metrics::record_lock("acquired");
                Ok(LockAttempt::Acquired(token))
            }
            Ok(Ok(false)) => {
                debug!(id = %id, "Mutation lock already held");
                crate::metrics::record_lock("busy");
                Ok(LockAttempt::AlreadyHeld)
            }
            Ok(Err(e)) => {
                warn!(id = %id, error = %e, "Mutation lock acquisition failed");
                crate::metrics::record_lock("error");
                Err(RecordError::CacheUnavailable(e.to_string()))
            }
            Err(_) => {
                // Fail closed: the write may have landed, but we cannot know we own it
                warn!(id = %id, timeout = ?self.call_timeout, "Mutation lock acquisition timed out");
                crate::metrics::record_timeout("lock", "acquire");
                crate::metrics::record_lock("busy");
                Ok(LockAttempt::AlreadyHeld)
            }
        }
    }

    /// Release the lock for `id` if it is still held with `token`.
    ///
    /// Returns `Ok(false)` when the entry is gone or belongs to another
    /// holder; that is a no-op, not an error.
    pub async fn release(&self, id: &str, token: LockToken) -> Result<bool, RecordError> {
        let key = lock_key(id);
        crate::metrics::record_lock_held(token.held_for());

        let outcome = tokio::time::timeout(
            self.call_timeout,
            self.cache.delete_if_matches(&key, token.value.as_bytes()),
        )
        .await;

        match outcome {
            Ok(Ok(true)) => {
                debug!(id = %id, held = ?token.held_for(), "Mutation lock released");
                crate::metrics::record_lock("released");
                Ok(true)
            }
            Ok(Ok(false)) => {
                warn!(
                    id = %id,
                    held = ?token.held_for(),
                    "Mutation lock was no longer ours at release (expired or taken over)"
                );
                crate::metrics::record_lock("stale_release");
                Ok(false)
            }
            Ok(Err(e)) => {
                crate::metrics::record_lock("error");
                Err(RecordError::CacheUnavailable(e.to_string()))
            }
            Err(_) => {
                crate::metrics::record_timeout("lock", "release");
                crate::metrics::record_lock("error");
                Err(RecordError::CacheUnavailable(format!(
                    "lock release timed out after {:?}",
                    self.call_timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryCache;

    const TTL: Duration = Duration::from_secs(10);
    const CALL_TIMEOUT: Duration = Duration::from_millis(200);

    fn lock_with_cache() -> (MutationLock, Arc<InMemoryCache>) {
        let cache = Arc::new(InMemoryCache::new());
        (MutationLock::new(cache.clone(), CALL_TIMEOUT), cache)
    }

    fn expect_token(attempt: LockAttempt) -> LockToken {
        match attempt {
            LockAttempt::Acquired(token) => token,
            LockAttempt::AlreadyHeld => panic!("expected to acquire the lock"),
        }
    }

    #[test]
    fn test_lock_key_format() {
        assert_eq!(lock_key("r1"), "lock:record:r1");
    }

    #[tokio::test]
    async fn test_acquire_then_second_acquire_is_rejected() {
        let (lock, cache) = lock_with_cache();

        let token = expect_token(lock.acquire("r1", TTL).await.unwrap());
        assert!(cache.contains("lock:record:r1"));

        let second = lock.acquire("r1", TTL).await.unwrap();
        assert!(!second.is_acquired());

        assert!(lock.release("r1", token).await.unwrap());
        assert!(!cache.contains("lock:record:r1"));
    }

    #[tokio::test]
    async fn test_different_ids_are_independent() {
        let (lock, _cache) = lock_with_cache();

        let a = expect_token(lock.acquire("a", TTL).await.unwrap());
        let b = expect_token(lock.acquire("b", TTL).await.unwrap());

        assert!(lock.release("a", a).await.unwrap());
        assert!(lock.release("b", b).await.unwrap());
    }

    #[tokio::test]
    async fn test_reacquire_after_release() {
        let (lock, _cache) = lock_with_cache();

        let first = expect_token(lock.acquire("r1", TTL).await.unwrap());
        lock.release("r1", first).await.unwrap();

        let second = expect_token(lock.acquire("r1", TTL).await.unwrap());
        assert!(lock.release("r1", second).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_self_heals_after_ttl() {
        let (lock, _cache) = lock_with_cache();

        let _crashed_holder = expect_token(lock.acquire("r1", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        let next = lock.acquire("r1", TTL).await.unwrap();
        assert!(next.is_acquired());
    }

    #[tokio::test]
    async fn test_expired_holder_cannot_release_new_holders_lock() {
        let (lock, cache) = lock_with_cache();

        let slow = expect_token(lock.acquire("r1", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        let fresh = expect_token(lock.acquire("r1", TTL).await.unwrap());

        // The slow holder's release is a no-op
        assert!(!lock.release("r1", slow).await.unwrap());
        assert!(cache.contains("lock:record:r1"));
        assert!(!lock.acquire("r1", TTL).await.unwrap().is_acquired());

        assert!(lock.release("r1", fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_for_other_id_does_not_release() {
        let (lock, cache) = lock_with_cache();

        let a = expect_token(lock.acquire("a", TTL).await.unwrap());
        let b = expect_token(lock.acquire("b", TTL).await.unwrap());

        assert!(!lock.release("a", b).await.unwrap());
        assert!(cache.contains("lock:record:a"));

        assert!(lock.release("a", a).await.unwrap());
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let (lock, _cache) = lock_with_cache();

        let a = expect_token(lock.acquire("a", TTL).await.unwrap());
        let b = expect_token(lock.acquire("b", TTL).await.unwrap());

        assert_ne!(a.value(), b.value());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let (lock, _cache) = lock_with_cache();
        let lock = Arc::new(lock);

        let mut handles = vec![];
        for _ in 0..16 {
            let lock = lock.clone();
            handles.push(tokio::spawn(async move {
                lock.acquire("hot", TTL).await.unwrap().is_acquired()
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
}
