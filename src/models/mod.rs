// src/models/mod.rs

//! Data models for the ingestion pipeline.

pub mod config;
pub mod item;
pub mod profile;
pub mod task;
pub mod watermark;

pub use config::{
    AdaptiveConfig, CacheConfig, ClientConfig, Config, DedupConfig, ExecutorConfig,
    RateLimitConfig, SchedulerConfig, StorageConfig, TierConfig,
};
pub use item::{CycleStatus, CycleSummary, Item, content_hash, normalize_text};
pub use profile::{SortMode, SourceQualityProfile, Tier, TierPolicy, TimeFilter};
pub use task::{FailureCategory, TaskRecord, TaskStatus};
pub use watermark::Watermark;
