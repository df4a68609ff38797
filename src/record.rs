// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record data structure.
//!
//! A [`Record`] is the unit the coordinator manages. The durable store owns
//! its canonical value; the cache only ever holds a JSON copy of a committed
//! state.
//!
//! # Example
//!
//! ```
//! use record_cache::Record;
//!
//! let record = Record::new("hello".into(), 1);
//!
//! assert_eq!(record.content, "hello");
//! assert_eq!(record.status, 1);
//! assert_eq!(record.created_at, record.updated_at);
//! ```

use serde::{Deserialize, Serialize};

/// Cache key namespace for record values.
pub const RECORD_KEY_PREFIX: &str = "record:";

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// UUID v4 string, immutable after creation
    pub id: String,
    /// Caller-supplied payload
    pub content: String,
    /// Lifecycle flag, set at creation
    pub status: i32,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last successful mutation (epoch millis)
    pub updated_at: i64,
}

impl Record {
    /// Create a record with a fresh id, stamping both timestamps from one clock read.
    pub fn new(content: String, status: i32) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a record from stored columns.
    pub fn reconstruct(
        id: String,
        content: String,
        status: i32,
        created_at: i64,
        updated_at: i64,
    ) -> Self {
        Self {
            id,
            content,
            status,
            created_at,
            updated_at,
        }
    }

    /// Apply a patch in place.
    pub fn apply(&mut self, patch: &RecordPatch) {
        self.content = patch.content.clone();
        self.updated_at = patch.updated_at;
    }

    /// Cache key holding this record.
    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key(&self.id)
    }
}

/// Fields changed by an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPatch {
    pub content: String,
    pub updated_at: i64,
}

impl RecordPatch {
    /// Patch replacing the content, stamped now.
    pub fn content(content: String) -> Self {
        Self {
            content,
            updated_at: now_millis(),
        }
    }
}

/// Cache key for a record id: `record:{id}`.
#[must_use]
pub fn cache_key(id: &str) -> String {
    format!("{}{}", RECORD_KEY_PREFIX, id)
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
