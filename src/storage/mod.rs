// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends.
//!
//! - [`traits`]: the `DurableStore` / `FastCache` contracts
//! - [`sql`]: MySQL/SQLite durable store (sqlx `Any`)
//! - [`redis`]: Redis fast cache
//! - [`memory`]: in-process implementations of both

pub mod traits;
pub mod memory;
pub mod redis;
pub mod sql;
