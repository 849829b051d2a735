//! Durable storage abstractions.
//!
//! The pipeline consumes four narrow interfaces: items (versioned
//! upserts), watermarks, quality profiles, and task audit records. The
//! core never issues schema work of its own; a backend only has to honor
//! the natural keys described here.
//!
//! [`LocalStore`] is the bundled JSON-file backend with a hot/cold
//! layout:
//!
//! ```text
//! {root}/
//! ├── watermarks.json
//! ├── profiles.json
//! ├── tasks.json
//! ├── current/{source}.json           # hot: live item set per source
//! └── archive/{source}/YYYY/MM.json   # cold: immutable monthly archives
//! ```

pub mod local;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Item, SourceQualityProfile, TaskRecord, Watermark};

/// Counts from one batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Rows stored for the first time
    pub inserted: usize,
    /// Rows stored as a new version of changed content
    pub updated: usize,
    /// Rows whose content hash matched the current version
    pub unchanged: usize,
}

/// Versioned item persistence.
///
/// Rows are keyed by `source + source_item_id + version`. For a given
/// `(source, source_item_id)` at most one row has `is_current = true`;
/// an upsert with changed content bumps the version and flips the prior
/// current row, while unchanged content only refreshes engagement
/// counters.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Upsert a batch for one source.
    async fn upsert_batch(&self, source: &str, items: &[Item]) -> Result<UpsertSummary>;

    /// All content hashes previously seen for a source.
    async fn known_hashes(&self, source: &str) -> Result<HashSet<String>>;

    /// Increment the duplicate-reference counter on the current row.
    async fn record_duplicate(&self, source: &str, source_item_id: &str) -> Result<()>;

    /// Load the hot item set for a source.
    async fn load_current(&self, source: &str) -> Result<Vec<Item>>;

    /// Move items created before `cutoff` into the cold archive.
    /// Returns how many rows moved. Archival never deletes the fact.
    async fn archive_older_than(&self, source: &str, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Per-source crawl cursor persistence.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, source: &str) -> Result<Option<Watermark>>;
    async fn put(&self, watermark: &Watermark) -> Result<()>;
    async fn all(&self) -> Result<Vec<Watermark>>;
}

/// Source quality profile persistence.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, source: &str) -> Result<Option<SourceQualityProfile>>;
    async fn all(&self) -> Result<Vec<SourceQualityProfile>>;

    /// Persist a batch of profiles in one write.
    async fn put_batch(&self, profiles: &[SourceQualityProfile]) -> Result<()>;
}

/// Task audit trail persistence. Records are mutated in place by the
/// executor but never deleted.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &TaskRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<TaskRecord>>;
    async fn update(&self, task: &TaskRecord) -> Result<()>;
    async fn all(&self) -> Result<Vec<TaskRecord>>;
}

pub use local::LocalStore;
