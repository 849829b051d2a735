// src/models/profile.rs

//! Source quality profiles and tier policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quality bucket controlling a source's crawl frequency and fetch strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    NoData,
    Blacklisted,
}

impl Tier {
    /// Tiers that are eligible for scheduling.
    pub fn is_schedulable(self) -> bool {
        matches!(self, Tier::Tier1 | Tier::Tier2 | Tier::Tier3)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
            Tier::Tier3 => "tier3",
            Tier::NoData => "no_data",
            Tier::Blacklisted => "blacklisted",
        }
    }
}

/// Remote listing sort order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    Newest,
    Top,
}

impl SortMode {
    /// Query-parameter value understood by the content API.
    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::Newest => "new",
            SortMode::Top => "top",
        }
    }
}

/// Remote listing time window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    Day,
    Week,
    Month,
}

impl TimeFilter {
    /// Query-parameter value understood by the content API.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
        }
    }
}

/// Fetch policy attached to a tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierPolicy {
    /// Hours between crawls of a source in this tier
    pub frequency_hours: u32,

    /// Listing sort order
    pub sort: SortMode,

    /// Listing time window
    pub time_filter: TimeFilter,

    /// Maximum items per fetch
    pub fetch_limit: u32,
}

/// Per-source quality profile, recomputed each scheduling pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceQualityProfile {
    /// Source community name
    pub source: String,

    /// Assigned quality tier
    pub tier: Tier,

    /// Persisted crawl frequency from the tier policy
    pub crawl_frequency_hours: u32,

    /// Rolling average of valid (non-duplicate) items per cycle
    pub avg_valid_items: f64,

    /// Composite quality score derived from the rolling signals
    pub quality_score: f64,

    /// Blacklisted sources are never scheduled
    pub is_blacklisted: bool,

    /// Multiplier applied when a source repeatedly under-delivers
    pub downrank_factor: f64,

    /// When the source was last successfully crawled
    pub last_crawled_at: Option<DateTime<Utc>>,
}

/// Weight of the newest cycle in `avg_valid_items`.
const AVG_VALID_ALPHA: f64 = 0.3;

impl SourceQualityProfile {
    /// Fresh profile for a source with no history.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            tier: Tier::NoData,
            crawl_frequency_hours: 24,
            avg_valid_items: 0.0,
            quality_score: 0.0,
            is_blacklisted: false,
            downrank_factor: 1.0,
            last_crawled_at: None,
        }
    }

    /// Fold one completed cycle into the rolling quality signals.
    pub fn record_cycle(&mut self, valid_items: usize, dedup_rate: f64, now: DateTime<Utc>) {
        self.avg_valid_items = self.avg_valid_items * (1.0 - AVG_VALID_ALPHA)
            + valid_items as f64 * AVG_VALID_ALPHA;
        // Duplicate-heavy sources decay toward zero quality.
        self.quality_score =
            (self.avg_valid_items * (1.0 - dedup_rate / 100.0) * self.downrank_factor).max(0.0);
        self.last_crawled_at = Some(now);
    }

    /// Whether the source is due for a crawl at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.is_blacklisted || !self.tier.is_schedulable() {
            return false;
        }
        match self.last_crawled_at {
            None => true,
            Some(last) => {
                let elapsed = now - last;
                elapsed >= chrono::Duration::hours(self.crawl_frequency_hours as i64)
            }
        }
    }
}
