//! Per-source crawl progress cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable cursor marking how far a source has been crawled.
///
/// `last_seen_created_at` is non-decreasing across successful cycles and is
/// only written after a cycle's dual-write has committed. A failed cycle
/// leaves the watermark untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Watermark {
    /// Source community name
    pub source: String,

    /// Identifier of the newest item seen so far
    pub last_seen_item_id: String,

    /// Creation timestamp of the newest item seen so far
    pub last_seen_created_at: Option<DateTime<Utc>>,

    /// Cumulative count of items fetched across all cycles
    pub total_items_fetched: u64,

    /// Rolling duplicate ratio, 0-100
    pub dedup_rate: f64,
}

/// Weight of the newest cycle in the rolling dedup rate.
const DEDUP_RATE_ALPHA: f64 = 0.3;

impl Watermark {
    /// Empty watermark for a source that has never been crawled.
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            last_seen_item_id: String::new(),
            last_seen_created_at: None,
            total_items_fetched: 0,
            dedup_rate: 0.0,
        }
    }

    /// Advance the cursor to `(created_at, item_id)` if it is newer.
    ///
    /// Ties on `created_at` are broken by the lexicographically greater id
    /// so the cursor stays deterministic. Older positions are ignored,
    /// which keeps the cursor monotone even when overlapping windows are
    /// re-fetched.
    pub fn advance(&mut self, created_at: DateTime<Utc>, item_id: &str) {
        match self.last_seen_created_at {
            None => {
                self.last_seen_created_at = Some(created_at);
                self.last_seen_item_id = item_id.to_string();
            }
            Some(seen) if created_at > seen => {
                self.last_seen_created_at = Some(created_at);
                self.last_seen_item_id = item_id.to_string();
            }
            Some(seen) if created_at == seen && item_id > self.last_seen_item_id.as_str() => {
                self.last_seen_item_id = item_id.to_string();
            }
            Some(_) => {}
        }
    }

    /// Fold one completed cycle's counts into the cumulative stats.
    pub fn record_cycle(&mut self, fetched: usize, duplicates: usize) {
        self.total_items_fetched += fetched as u64;
        if fetched > 0 {
            let cycle_rate = (duplicates as f64 / fetched as f64) * 100.0;
            self.dedup_rate =
                self.dedup_rate * (1.0 - DEDUP_RATE_ALPHA) + cycle_rate * DEDUP_RATE_ALPHA;
        }
    }

    /// Whether an item timestamp falls past the cursor.
    pub fn is_past_cursor(&self, created_at: DateTime<Utc>) -> bool {
        match self.last_seen_created_at {
            None => true,
            Some(seen) => created_at >= seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_advance_moves_forward() {
        let mut wm = Watermark::empty("rustlang");
        wm.advance(ts(100), "a");
        assert_eq!(wm.last_seen_created_at, Some(ts(100)));
        assert_eq!(wm.last_seen_item_id, "a");

        wm.advance(ts(200), "b");
        assert_eq!(wm.last_seen_created_at, Some(ts(200)));
        assert_eq!(wm.last_seen_item_id, "b");
    }

    #[test]
    fn test_advance_ignores_older() {
        let mut wm = Watermark::empty("rustlang");
        wm.advance(ts(200), "b");
        wm.advance(ts(100), "a");
        assert_eq!(wm.last_seen_created_at, Some(ts(200)));
        assert_eq!(wm.last_seen_item_id, "b");
    }

    #[test]
    fn test_advance_breaks_ties_by_id() {
        let mut wm = Watermark::empty("rustlang");
        wm.advance(ts(100), "b");
        wm.advance(ts(100), "a");
        assert_eq!(wm.last_seen_item_id, "b");

        wm.advance(ts(100), "c");
        assert_eq!(wm.last_seen_item_id, "c");
        assert_eq!(wm.last_seen_created_at, Some(ts(100)));
    }

    #[test]
    fn test_record_cycle_rolls_dedup_rate() {
        let mut wm = Watermark::empty("rustlang");
        wm.record_cycle(10, 5); // 50% duplicates
        assert_eq!(wm.total_items_fetched, 10);
        assert!((wm.dedup_rate - 15.0).abs() < 1e-9);

        wm.record_cycle(0, 0); // empty cycle leaves the rate alone
        assert!((wm.dedup_rate - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_is_past_cursor() {
        let mut wm = Watermark::empty("rustlang");
        assert!(wm.is_past_cursor(ts(1)));

        wm.advance(ts(100), "a");
        assert!(!wm.is_past_cursor(ts(99)));
        assert!(wm.is_past_cursor(ts(100)));
        assert!(wm.is_past_cursor(ts(101)));
    }
}
