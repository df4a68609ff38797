// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic record-cache usage example.
//!
//! Demonstrates:
//! 1. Building a coordinator (real backends if configured, in-memory otherwise)
//! 2. Create, then a read served from the cache
//! 3. Write-through update
//! 4. A second writer rejected while the mutation lock is held
//! 5. Delete, then a read that reports not found
//! 6. Health check and captured metrics
//!
//! # Run
//!
//! ```bash
//! # In-memory backends
//! cargo run --example basic_usage
//!
//! # Redis + SQL
//! RECORD_CACHE_REDIS_URL=redis://localhost:6379 \
//! RECORD_CACHE_SQL_URL=sqlite://demo.db?mode=rwc \
//!     cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Instant;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use record_cache::{
    InMemoryCache, InMemoryStore, LockAttempt, RecordCacheConfig, RecordCoordinator, RecordError,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           record-cache: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Build the coordinator
    // ─────────────────────────────────────────────────────────────────────────
    let config = RecordCacheConfig {
        redis_url: std::env::var("RECORD_CACHE_REDIS_URL").ok(),
        sql_url: std::env::var("RECORD_CACHE_SQL_URL").ok(),
        redis_prefix: Some("demo:".into()),
        ..Default::default()
    };

    let coordinator = if config.redis_url.is_some() && config.sql_url.is_some() {
        println!("📦 Connecting to Redis and SQL...");
        RecordCoordinator::connect(config).await?
    } else {
        println!("📦 No backend URLs set, using in-memory store and cache");
        RecordCoordinator::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryCache::new()),
            config,
        )?
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Create and read back
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Creating a record...");
    let record = coordinator.create("hello").await?;
    println!("   └─ {} → {:?} (status {})", record.id, record.content, record.status);

    let start = Instant::now();
    let read = coordinator.read(&record.id).await?;
    println!("   └─ Read back {:?} in {:?} (cache hit)", read.content, start.elapsed());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Update (write-through)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n✏️  Updating...");
    let updated = coordinator.update(&record.id, "world").await?;
    println!("   └─ updated_at {} → {}", record.updated_at, updated.updated_at);
    println!("   └─ Read after update: {:?}", coordinator.read(&record.id).await?.content);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Contended update
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔒 Holding the mutation lock and trying a second writer...");
    let held = coordinator.lock().acquire(&record.id, coordinator.config().lock_ttl()).await?;
    match coordinator.update(&record.id, "b").await {
        Err(e @ RecordError::ResourceBusy { .. }) => {
            println!("   └─ Rejected: {} ({})", e, e.user_message());
        }
        other => println!("   └─ Unexpected: {:?}", other),
    }
    if let LockAttempt::Acquired(token) = held {
        coordinator.lock().release(&record.id, token).await?;
    }
    println!("   └─ Lock released, retry: {:?}", coordinator.update(&record.id, "a").await?.content);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Delete
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🗑️  Deleting...");
    coordinator.delete(&record.id).await?;
    match coordinator.read(&record.id).await {
        Err(e) => println!("   └─ Read after delete: {} ({})", e, e.user_message()),
        Ok(r) => println!("   └─ Unexpected: {:?}", r),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Health and metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🩺 Health check:");
    println!("   └─ {}", serde_json::to_string(&coordinator.health_check().await)?);

    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n✅ Done\n");
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_kind, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    for (name, labels, value) in &counters {
        println!("   ├─ {}{} = {}", name, labels, value);
    }
    for (name, labels, value) in &gauges {
        println!("   ├─ {}{} = {:.0}", name, labels, value);
    }
    for (name, labels, count, sum) in &histograms {
        println!("   ├─ {}{} count={} sum={:.6}s", name, labels, count, sum);
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
