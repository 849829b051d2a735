// src/cache/metrics.rs

//! Minute-bucketed cache hit/miss counters.
//!
//! Counts live in the cache backend as `metrics:{minute}:{hit|miss}`
//! counter keys with a TTL, so buckets age out on their own. The hit
//! rate over a trailing window tolerates partially missing buckets as
//! zero and returns 0.0 (not an error, not NaN) when no data exists.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::CacheBackend;
use crate::error::Result;
use crate::models::CacheConfig;

/// Windowed hit/miss metric stream.
#[derive(Clone)]
pub struct CacheMetrics {
    backend: Arc<dyn CacheBackend>,
    bucket_ttl: Duration,
}

impl CacheMetrics {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            bucket_ttl: Duration::from_secs(config.bucket_ttl_secs),
        }
    }

    /// Minute index of a timestamp.
    fn minute_of(ts: DateTime<Utc>) -> i64 {
        ts.timestamp().div_euclid(60)
    }

    fn bucket_key(minute: i64, kind: &str) -> String {
        format!("metrics:{}:{}", minute, kind)
    }

    /// Record a cache hit in the current minute bucket.
    pub async fn record_hit(&self) -> Result<()> {
        self.record_hit_at(Utc::now()).await
    }

    /// Record a cache miss in the current minute bucket.
    pub async fn record_miss(&self) -> Result<()> {
        self.record_miss_at(Utc::now()).await
    }

    pub(crate) async fn record_hit_at(&self, ts: DateTime<Utc>) -> Result<()> {
        self.bump(Self::minute_of(ts), "hit").await
    }

    pub(crate) async fn record_miss_at(&self, ts: DateTime<Utc>) -> Result<()> {
        self.bump(Self::minute_of(ts), "miss").await
    }

    async fn bump(&self, minute: i64, kind: &str) -> Result<()> {
        let key = Self::bucket_key(minute, kind);
        self.backend.incr(&key, 1).await?;
        self.backend.expire(&key, self.bucket_ttl).await
    }

    /// Hit rate over the trailing `window_minutes`, in `[0, 1]`.
    pub async fn hit_rate(&self, window_minutes: u32) -> Result<f64> {
        self.hit_rate_at(Utc::now(), window_minutes).await
    }

    pub(crate) async fn hit_rate_at(
        &self,
        now: DateTime<Utc>,
        window_minutes: u32,
    ) -> Result<f64> {
        let current = Self::minute_of(now);
        let window = window_minutes.max(1) as i64;

        let mut hits = 0u64;
        let mut total = 0u64;
        for minute in (current - window + 1)..=current {
            let hit = self.read_counter(&Self::bucket_key(minute, "hit")).await?;
            let miss = self.read_counter(&Self::bucket_key(minute, "miss")).await?;
            hits += hit;
            total += hit + miss;
        }

        if total == 0 {
            return Ok(0.0);
        }
        Ok(hits as f64 / total as f64)
    }

    async fn read_counter(&self, key: &str) -> Result<u64> {
        let raw = self.backend.get(key).await?;
        Ok(raw.and_then(|value| value.parse().ok()).unwrap_or(0))
    }
}
