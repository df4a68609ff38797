// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for record-cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `record_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: cache, store, lock, all
//! - `operation`: create, read, update, delete, populate, evict, ...
//! - `status`: success, hit, miss, error, busy, not_found, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "record_cache_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "record_cache_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a mutation lock outcome: acquired, busy, released, stale_release, error
pub fn record_lock(outcome: &str) {
    counter!(
        "record_cache_lock_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record how long a mutation lock was held
pub fn record_lock_held(duration: Duration) {
    histogram!("record_cache_lock_held_seconds").record(duration.as_secs_f64());
}

/// Record a cache failure that was logged and not surfaced to the caller
pub fn record_swallowed(operation: &str) {
    counter!(
        "record_cache_swallowed_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an error with category for alerting
pub fn record_error(tier: &str, operation: &str, error_type: &str) {
    counter!(
        "record_cache_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a deadline expiry
pub fn record_timeout(tier: &str, operation: &str) {
    counter!(
        "record_cache_timeouts_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a connection/backend error
pub fn record_connection_error(backend: &str) {
    counter!(
        "record_cache_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "record_cache_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "record_cache_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}
