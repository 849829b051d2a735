//! Application configuration structures.
//!
//! The configuration is an explicitly constructed object passed to each
//! component at construction time; there is no process-wide singleton.
//! [`Config::reload`] re-reads the backing file in place.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{SortMode, Tier, TierPolicy, TimeFilter};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Outbound call quota settings
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Content API client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Hot cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Near-duplicate detection settings
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Tier thresholds and per-tier fetch policies
    #[serde(default)]
    pub tiers: TierConfig,

    /// Retry and dead-letter settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Adaptive sweep-period settings
    #[serde(default)]
    pub adaptive: AdaptiveConfig,

    /// Worker pool and sweep loop settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Durable store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Source communities to harvest
    #[serde(default)]
    pub sources: Vec<String>,

    /// Sources excluded from tiering and scheduling entirely
    #[serde(default)]
    pub blacklist: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Re-read the backing file, replacing this configuration in place.
    pub fn reload(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let fresh = Self::load(&path)?;
        fresh.validate()?;
        *self = fresh;
        log::info!("Configuration reloaded from {:?}", path.as_ref());
        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_calls == 0 {
            return Err(AppError::validation("rate_limit.max_calls must be > 0"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(AppError::validation("rate_limit.window_secs must be > 0"));
        }
        if self.client.max_concurrency == 0 {
            return Err(AppError::validation("client.max_concurrency must be > 0"));
        }
        if self.client.request_timeout_secs == 0 {
            return Err(AppError::validation(
                "client.request_timeout_secs must be > 0",
            ));
        }
        if self.client.user_agent.trim().is_empty() {
            return Err(AppError::validation("client.user_agent is empty"));
        }
        if !(self.dedup.threshold > 0.0 && self.dedup.threshold <= 1.0) {
            return Err(AppError::validation("dedup.threshold must be in (0, 1]"));
        }
        if self.tiers.tier1_min_avg <= self.tiers.tier2_min_avg {
            return Err(AppError::validation(
                "tiers.tier1_min_avg must exceed tiers.tier2_min_avg",
            ));
        }
        if self.executor.max_retries == 0 {
            return Err(AppError::validation("executor.max_retries must be > 0"));
        }
        if !(self.adaptive.low_cutoff < self.adaptive.high_cutoff
            && self.adaptive.low_cutoff > 0.0
            && self.adaptive.high_cutoff < 1.0)
        {
            return Err(AppError::validation(
                "adaptive cutoffs must satisfy 0 < low < high < 1",
            ));
        }
        if self.scheduler.worker_count == 0 {
            return Err(AppError::validation("scheduler.worker_count must be > 0"));
        }
        if self.sources.is_empty() {
            return Err(AppError::validation("No sources defined"));
        }
        Ok(())
    }
}

/// Sliding-window quota on outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum calls allowed inside one window
    #[serde(default = "defaults::max_calls")]
    pub max_calls: usize,

    /// Window length in seconds
    #[serde(default = "defaults::window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: defaults::max_calls(),
            window_secs: defaults::window_secs(),
        }
    }
}

/// Content API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// OAuth2 token endpoint
    #[serde(default = "defaults::token_url")]
    pub token_url: String,

    /// Base URL of the content API
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// OAuth2 client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth2 client secret (usually injected via environment)
    #[serde(default)]
    pub client_secret: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds, distinct from the cycle deadline
    #[serde(default = "defaults::request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum simultaneous in-flight requests
    #[serde(default = "defaults::max_concurrency")]
    pub max_concurrency: usize,

    /// Seconds subtracted from token expiry before refreshing
    #[serde(default = "defaults::token_refresh_skew")]
    pub token_refresh_skew_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_url: defaults::token_url(),
            api_base: defaults::api_base(),
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: defaults::user_agent(),
            request_timeout_secs: defaults::request_timeout(),
            max_concurrency: defaults::max_concurrency(),
            token_refresh_skew_secs: defaults::token_refresh_skew(),
        }
    }
}

/// Hot cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness TTL for cached batches, in seconds
    #[serde(default = "defaults::cache_ttl")]
    pub ttl_secs: u64,

    /// Expiry TTL for metric counter buckets, in seconds
    #[serde(default = "defaults::bucket_ttl")]
    pub bucket_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::cache_ttl(),
            bucket_ttl_secs: defaults::bucket_ttl(),
        }
    }
}

/// Near-duplicate detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Jaccard similarity threshold for clustering, in (0, 1]
    #[serde(default = "defaults::dedup_threshold")]
    pub threshold: f64,

    /// Below this batch size, skip the pre-filter and compare all pairs
    #[serde(default = "defaults::small_set_cutoff")]
    pub small_set_cutoff: usize,

    /// Words per shingle in the candidate pre-filter
    #[serde(default = "defaults::shingle_size")]
    pub shingle_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::dedup_threshold(),
            small_set_cutoff: defaults::small_set_cutoff(),
            shingle_size: defaults::shingle_size(),
        }
    }
}

/// Tier thresholds and per-tier fetch policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// `avg_valid_items` above this goes to tier1
    #[serde(default = "defaults::tier1_min_avg")]
    pub tier1_min_avg: f64,

    /// `avg_valid_items` above this (and at most tier1_min_avg) goes to tier2
    #[serde(default = "defaults::tier2_min_avg")]
    pub tier2_min_avg: f64,

    /// Fetch policy for tier1 sources
    #[serde(default = "defaults::tier1_policy")]
    pub tier1: TierPolicy,

    /// Fetch policy for tier2 sources
    #[serde(default = "defaults::tier2_policy")]
    pub tier2: TierPolicy,

    /// Fetch policy for tier3 sources
    #[serde(default = "defaults::tier3_policy")]
    pub tier3: TierPolicy,
}

impl TierConfig {
    /// Fetch policy for a schedulable tier, `None` otherwise.
    pub fn policy_for(&self, tier: Tier) -> Option<TierPolicy> {
        match tier {
            Tier::Tier1 => Some(self.tier1),
            Tier::Tier2 => Some(self.tier2),
            Tier::Tier3 => Some(self.tier3),
            Tier::NoData | Tier::Blacklisted => None,
        }
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            tier1_min_avg: defaults::tier1_min_avg(),
            tier2_min_avg: defaults::tier2_min_avg(),
            tier1: defaults::tier1_policy(),
            tier2: defaults::tier2_policy(),
            tier3: defaults::tier3_policy(),
        }
    }
}

/// Retry and dead-letter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Retries before a task is dead-lettered
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base of the exponential retry backoff, in seconds
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_secs: u64,

    /// Upper bound on a single backoff delay, in seconds
    #[serde(default = "defaults::backoff_cap")]
    pub backoff_cap_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            backoff_base_secs: defaults::backoff_base(),
            backoff_cap_secs: defaults::backoff_cap(),
        }
    }
}

/// Adaptive sweep-period settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Hit rate below this tightens the sweep period
    #[serde(default = "defaults::low_cutoff")]
    pub low_cutoff: f64,

    /// Hit rate above this relaxes the sweep period
    #[serde(default = "defaults::high_cutoff")]
    pub high_cutoff: f64,

    /// Sweep period when the cache is cold, in hours
    #[serde(default = "defaults::tight_period")]
    pub tight_period_hours: u32,

    /// Sweep period in the steady state, in hours
    #[serde(default = "defaults::normal_period")]
    pub normal_period_hours: u32,

    /// Sweep period when the cache is hot, in hours
    #[serde(default = "defaults::relaxed_period")]
    pub relaxed_period_hours: u32,

    /// Trailing hit-rate window, in minutes
    #[serde(default = "defaults::hit_rate_window")]
    pub window_minutes: u32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            low_cutoff: defaults::low_cutoff(),
            high_cutoff: defaults::high_cutoff(),
            tight_period_hours: defaults::tight_period(),
            normal_period_hours: defaults::normal_period(),
            relaxed_period_hours: defaults::relaxed_period(),
            window_minutes: defaults::hit_rate_window(),
        }
    }
}

/// Worker pool and sweep loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker tasks executing crawl cycles
    #[serde(default = "defaults::worker_count")]
    pub worker_count: usize,

    /// Seconds between tier recomputation passes
    #[serde(default = "defaults::maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::worker_count(),
            maintenance_interval_secs: defaults::maintenance_interval(),
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Days an item stays in the hot file before cold archival
    #[serde(default = "defaults::retention_days")]
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention_days: defaults::retention_days(),
        }
    }
}

mod defaults {
    use crate::models::{SortMode, TierPolicy, TimeFilter};

    // Rate limit defaults
    pub fn max_calls() -> usize {
        60
    }
    pub fn window_secs() -> u64 {
        60
    }

    // Client defaults
    pub fn token_url() -> String {
        "https://auth.example.com/oauth2/token".into()
    }
    pub fn api_base() -> String {
        "https://api.example.com/v1".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; gleaner/1.0)".into()
    }
    pub fn request_timeout() -> u64 {
        30
    }
    pub fn max_concurrency() -> usize {
        5
    }
    pub fn token_refresh_skew() -> u64 {
        30
    }

    // Cache defaults
    pub fn cache_ttl() -> u64 {
        1800
    }
    pub fn bucket_ttl() -> u64 {
        7200
    }

    // Dedup defaults
    pub fn dedup_threshold() -> f64 {
        0.85
    }
    pub fn small_set_cutoff() -> usize {
        10
    }
    pub fn shingle_size() -> usize {
        3
    }

    // Tier defaults
    pub fn tier1_min_avg() -> f64 {
        20.0
    }
    pub fn tier2_min_avg() -> f64 {
        10.0
    }
    pub fn tier1_policy() -> TierPolicy {
        TierPolicy {
            frequency_hours: 2,
            sort: SortMode::Newest,
            time_filter: TimeFilter::Week,
            fetch_limit: 50,
        }
    }
    pub fn tier2_policy() -> TierPolicy {
        TierPolicy {
            frequency_hours: 6,
            sort: SortMode::Top,
            time_filter: TimeFilter::Week,
            fetch_limit: 80,
        }
    }
    pub fn tier3_policy() -> TierPolicy {
        TierPolicy {
            frequency_hours: 24,
            sort: SortMode::Top,
            time_filter: TimeFilter::Month,
            fetch_limit: 100,
        }
    }

    // Executor defaults
    pub fn max_retries() -> u32 {
        3
    }
    pub fn backoff_base() -> u64 {
        60
    }
    pub fn backoff_cap() -> u64 {
        3600
    }

    // Adaptive defaults
    pub fn low_cutoff() -> f64 {
        0.7
    }
    pub fn high_cutoff() -> f64 {
        0.9
    }
    pub fn tight_period() -> u32 {
        1
    }
    pub fn normal_period() -> u32 {
        2
    }
    pub fn relaxed_period() -> u32 {
        4
    }
    pub fn hit_rate_window() -> u32 {
        60
    }

    // Scheduler defaults
    pub fn worker_count() -> usize {
        4
    }
    pub fn maintenance_interval() -> u64 {
        21_600
    }

    // Storage defaults
    pub fn retention_days() -> u32 {
        30
    }
}
