//! Harvested item data structures.
//!
//! An [`Item`] is one unit of content fetched from a community source.
//! `body_normalized` and `content_hash` are derived fields: the hash is a
//! pure function of the normalized body, so two fetches of unchanged
//! content always collide.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One harvested unit of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Source community name (e.g. a subreddit-style handle)
    pub source: String,

    /// Item identifier, unique within its source
    pub source_item_id: String,

    /// Monotonic content version, bumped when the body changes
    pub version: u32,

    /// When the item was created on the remote community
    pub created_at: DateTime<Utc>,

    /// When this crawler fetched the item
    pub fetched_at: DateTime<Utc>,

    /// Item title
    pub title: String,

    /// Raw item body
    pub body: String,

    /// Lowercased, punctuation- and whitespace-folded body (derived)
    pub body_normalized: String,

    /// SHA-256 of `body_normalized`, hex encoded (derived)
    pub content_hash: String,

    /// Community identifier on the remote service
    pub community_id: String,

    /// Mutable engagement counter: vote score
    pub score: i64,

    /// Mutable engagement counter: comment count
    pub comment_count: u32,

    /// True for the latest version of a given `source_item_id`
    pub is_current: bool,

    /// How many times identical content was re-seen for this row
    pub duplicate_refs: u32,
}

impl Item {
    /// Natural key for durable upserts: `source + source_item_id + version`.
    pub fn natural_key(&self) -> String {
        format!("{}:{}:{}", self.source, self.source_item_id, self.version)
    }

    /// Recompute the derived fields from `title` and `body`.
    pub fn finalize(&mut self) {
        self.body_normalized = normalize_text(&format!("{} {}", self.title, self.body));
        self.content_hash = content_hash(&self.body_normalized);
    }
}

/// Fold text for comparison: lowercase, strip punctuation, collapse runs
/// of whitespace to single spaces.
pub fn normalize_text(text: &str) -> String {
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    let punct = PUNCT.get_or_init(|| Regex::new(r"[^\w\s]+").expect("valid regex literal"));

    let lowered = text.to_lowercase();
    let stripped = punct.replace_all(&lowered, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex digest of a normalized body.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Terminal status of one crawl cycle for one source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Summary of one crawl cycle for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Source the cycle ran against
    pub source: String,

    /// Items stored for the first time
    pub new_items: usize,

    /// Items stored as a new version of existing content
    pub updated_items: usize,

    /// Items dropped as exact or near duplicates
    pub duplicates: usize,

    /// Items skipped as individually malformed
    pub skipped: usize,

    /// Whether the batch was served from the hot cache
    pub from_cache: bool,

    /// Wall-clock cycle duration in milliseconds
    pub duration_ms: u64,

    /// Terminal cycle status
    pub status: CycleStatus,
}

impl CycleSummary {
    /// Start a summary for a source with zeroed counters.
    ///
    /// The status starts as `Failed`; the cycle flips it to `Completed`
    /// only once it actually finishes, so an abandoned summary never
    /// reads as a success.
    pub fn started(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            new_items: 0,
            updated_items: 0,
            duplicates: 0,
            skipped: 0,
            from_cache: false,
            duration_ms: 0,
            status: CycleStatus::Failed,
        }
    }

    /// Items that survived ingestion this cycle.
    pub fn accepted(&self) -> usize {
        self.new_items + self.updated_items
    }
}

/// Test fixture shared across module tests.
#[cfg(test)]
pub(crate) fn sample_item(id: &str, body: &str) -> Item {
    let mut item = Item {
        source: "rustlang".to_string(),
        source_item_id: id.to_string(),
        version: 1,
        created_at: Utc::now(),
        fetched_at: Utc::now(),
        title: "Sample title".to_string(),
        body: body.to_string(),
        body_normalized: String::new(),
        content_hash: String::new(),
        community_id: "c_rustlang".to_string(),
        score: 10,
        comment_count: 2,
        is_current: true,
        duplicate_refs: 0,
    };
    item.finalize();
    item
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_case_punctuation_whitespace() {
        let normalized = normalize_text("Hello,  WORLD!  It's \n fine.");
        assert_eq!(normalized, "hello world it s fine");
    }

    #[test]
    fn test_content_hash_is_pure() {
        let a = normalize_text("Borrow checker basics!");
        let b = normalize_text("borrow   checker basics");
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash("something else"));
    }

    #[test]
    fn test_finalize_derives_fields() {
        let item = sample_item("p1", "Some Body Text");
        assert!(item.body_normalized.contains("some body text"));
        assert_eq!(item.content_hash.len(), 64);
    }

    #[test]
    fn test_natural_key() {
        let item = sample_item("p1", "body");
        assert_eq!(item.natural_key(), "rustlang:p1:1");
    }

    #[test]
    fn test_started_summary_is_not_a_success() {
        let summary = CycleSummary::started("rustlang");
        assert_ne!(summary.status, CycleStatus::Completed);
        assert_eq!(summary.accepted(), 0);
    }
}
