//! Incremental crawl cycles.
//!
//! One cycle for one source: consult the hot cache, fetch from the API
//! on a miss, drop everything behind the watermark, fold exact and
//! near duplicates away, upsert what survives, and only then advance
//! the watermark. A cycle that fails anywhere before the final
//! watermark write leaves the cursor untouched, so the next cycle
//! re-fetches the same window instead of skipping it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};

use crate::cache::{CacheMetrics, CacheStore};
use crate::client::{FetchOutcome, PostApi};
use crate::dedup::Deduplicator;
use crate::error::{AppError, Result};
use crate::models::{CycleStatus, CycleSummary, Item, TierPolicy, Watermark};
use crate::store::{ItemStore, WatermarkStore};

/// One source paired with the fetch policy of its tier.
#[derive(Debug, Clone)]
pub struct CrawlTarget {
    pub source: String,
    pub policy: TierPolicy,
}

/// Seam between the executor and the crawler.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    /// Run one full crawl cycle for a target.
    async fn run_cycle(&self, target: &CrawlTarget) -> Result<CycleSummary>;
}

/// Watermark-driven crawler over the content API.
pub struct IncrementalCrawler {
    api: Arc<dyn PostApi>,
    items: Arc<dyn ItemStore>,
    watermarks: Arc<dyn WatermarkStore>,
    cache: CacheStore,
    metrics: CacheMetrics,
    dedup: Deduplicator,
    // Sources with a cycle currently running. An overlapping cycle for
    // the same source is rejected, not queued. Guarded by a sync mutex
    // so the release can run from a drop guard.
    in_flight: Mutex<HashSet<String>>,
}

fn lock_set(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases a source's in-flight slot on drop, so a cycle cancelled
/// mid-await cannot leave the source permanently claimed.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    source: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_set(self.set).remove(&self.source);
    }
}

impl IncrementalCrawler {
    pub fn new(
        api: Arc<dyn PostApi>,
        items: Arc<dyn ItemStore>,
        watermarks: Arc<dyn WatermarkStore>,
        cache: CacheStore,
        metrics: CacheMetrics,
        dedup: Deduplicator,
    ) -> Self {
        Self {
            api,
            items,
            watermarks,
            cache,
            metrics,
            dedup,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run cycles for many targets with bounded concurrency.
    ///
    /// Each cycle gets the same per-cycle deadline; a cycle that blows
    /// it is reported as `Cancelled` without affecting its siblings.
    pub async fn crawl_batch(
        &self,
        targets: &[CrawlTarget],
        concurrency: usize,
        deadline: Duration,
    ) -> Vec<CycleSummary> {
        stream::iter(targets)
            .map(|target| async move {
                match tokio::time::timeout(deadline, self.run_cycle(target)).await {
                    Ok(Ok(summary)) => summary,
                    Ok(Err(e)) => {
                        log::error!("Cycle failed for {}: {}", target.source, e);
                        failed_summary(&target.source, CycleStatus::Failed)
                    }
                    Err(_) => {
                        log::warn!(
                            "Cycle for {} exceeded deadline of {:?}",
                            target.source,
                            deadline
                        );
                        failed_summary(&target.source, CycleStatus::Cancelled)
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    fn claim(&self, source: &str) -> Result<InFlightGuard<'_>> {
        let mut in_flight = lock_set(&self.in_flight);
        if !in_flight.insert(source.to_string()) {
            return Err(AppError::crawl(source, "cycle already in flight"));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            source: source.to_string(),
        })
    }

    async fn obtain_batch(&self, target: &CrawlTarget) -> Result<(FetchOutcome, bool)> {
        // A fresh empty batch is still a hit: a quiet source should not
        // re-spend rate budget just because it had nothing to say.
        let (cached, fresh) = self.cache.get(&target.source).await?;
        if fresh {
            self.metrics.record_hit().await?;
            log::debug!(
                "Serving {} items for {} from cache",
                cached.len(),
                target.source
            );
            return Ok((
                FetchOutcome {
                    items: cached,
                    skipped: 0,
                },
                true,
            ));
        }
        self.metrics.record_miss().await?;

        let outcome = self
            .api
            .fetch_batch(
                &target.source,
                target.policy.fetch_limit,
                target.policy.sort,
                target.policy.time_filter,
            )
            .await?;
        Ok((outcome, false))
    }

    /// Drop exact re-fetches: items whose content hash is already stored.
    async fn drop_known(
        &self,
        source: &str,
        items: Vec<Item>,
        summary: &mut CycleSummary,
    ) -> Result<Vec<Item>> {
        let known = self.items.known_hashes(source).await?;
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if known.contains(&item.content_hash) {
                self.items
                    .record_duplicate(source, &item.source_item_id)
                    .await?;
                summary.duplicates += 1;
            } else {
                kept.push(item);
            }
        }
        Ok(kept)
    }

    /// Fold near-duplicate clusters down to their representatives.
    ///
    /// Returns the representatives plus one representative id per folded
    /// member. The reference counts are recorded by the caller after the
    /// upsert commits, because a first-seen representative has no stored
    /// row to count against until then.
    fn fold_near_duplicates(
        &self,
        source: &str,
        items: &[Item],
        summary: &mut CycleSummary,
    ) -> (Vec<Item>, Vec<String>) {
        let outcome = self.dedup.dedupe(items);
        log::debug!(
            "Dedup for {}: {} posts, {} candidate pairs, {} checks",
            source,
            outcome.counters.total_posts,
            outcome.counters.candidate_pairs,
            outcome.counters.similarity_checks
        );

        let mut representatives = Vec::with_capacity(outcome.clusters.len());
        let mut folded = Vec::new();
        for cluster in outcome.clusters {
            for dup_id in &cluster.duplicate_ids {
                log::debug!(
                    "Folding {}:{} into {}",
                    source,
                    dup_id,
                    cluster.representative.source_item_id
                );
                folded.push(cluster.representative.source_item_id.clone());
                summary.duplicates += 1;
            }
            representatives.push(cluster.representative);
        }
        (representatives, folded)
    }
}

#[async_trait]
impl CycleRunner for IncrementalCrawler {
    async fn run_cycle(&self, target: &CrawlTarget) -> Result<CycleSummary> {
        let _guard = self.claim(&target.source)?;
        self.run_cycle_inner(target).await
    }
}

impl IncrementalCrawler {
    async fn run_cycle_inner(&self, target: &CrawlTarget) -> Result<CycleSummary> {
        let started = std::time::Instant::now();
        let mut summary = CycleSummary::started(&target.source);

        let (outcome, from_cache) = self.obtain_batch(target).await?;
        summary.from_cache = from_cache;
        summary.skipped = outcome.skipped;
        let fetched_count = outcome.items.len();
        // Cursor positions of everything fetched, duplicates included:
        // a dropped duplicate still marks its window as seen.
        let cursor_seen: Vec<(DateTime<Utc>, String)> = outcome
            .items
            .iter()
            .map(|item| (item.created_at, item.source_item_id.clone()))
            .collect();

        let mut watermark = self
            .watermarks
            .get(&target.source)
            .await?
            .unwrap_or_else(|| Watermark::empty(&target.source));

        // Items strictly behind the cursor were ingested by an earlier
        // cycle; items at the cursor timestamp are re-checked because
        // the cursor cannot distinguish same-second siblings.
        let (candidates, behind): (Vec<Item>, Vec<Item>) = outcome
            .items
            .into_iter()
            .partition(|item| watermark.is_past_cursor(item.created_at));
        summary.duplicates += behind.len();

        let candidates = self
            .drop_known(&target.source, candidates, &mut summary)
            .await?;
        let (survivors, folded) =
            self.fold_near_duplicates(&target.source, &candidates, &mut summary);

        let upserts = self.items.upsert_batch(&target.source, &survivors).await?;
        summary.new_items = upserts.inserted;
        summary.updated_items = upserts.updated;
        for rep_id in &folded {
            self.items.record_duplicate(&target.source, rep_id).await?;
        }

        if !from_cache {
            self.cache.put(&target.source, &survivors).await?;
        }

        // Watermark last: it only moves once the dual write committed.
        for (created_at, item_id) in &cursor_seen {
            watermark.advance(*created_at, item_id);
        }
        watermark.record_cycle(fetched_count, summary.duplicates);
        self.watermarks.put(&watermark).await?;

        summary.duration_ms = started.elapsed().as_millis() as u64;
        summary.status = CycleStatus::Completed;
        log::info!(
            "Cycle for {}: {} new, {} updated, {} duplicates, {} skipped, cache={}, {}ms",
            summary.source,
            summary.new_items,
            summary.updated_items,
            summary.duplicates,
            summary.skipped,
            summary.from_cache,
            summary.duration_ms
        );
        Ok(summary)
    }
}

fn failed_summary(source: &str, status: CycleStatus) -> CycleSummary {
    let mut summary = CycleSummary::started(source);
    summary.status = status;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::item::sample_item;
    use crate::models::{CacheConfig, DedupConfig, SortMode, TimeFilter};
    use crate::store::LocalStore;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Mutex as AsyncMutex;

    /// API double returning pre-scripted batches in order.
    struct ScriptedApi {
        batches: AsyncMutex<VecDeque<Result<Vec<Item>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(batches: Vec<Result<Vec<Item>>>) -> Self {
            Self {
                batches: AsyncMutex::new(batches.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PostApi for ScriptedApi {
        async fn fetch_batch(
            &self,
            source: &str,
            _limit: u32,
            _sort: SortMode,
            _time_filter: TimeFilter,
        ) -> Result<FetchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.batches.lock().await.pop_front();
            match next {
                Some(Ok(items)) => Ok(FetchOutcome { items, skipped: 0 }),
                Some(Err(e)) => Err(e),
                None => Err(AppError::crawl(source, "script exhausted")),
            }
        }
    }

    fn target() -> CrawlTarget {
        CrawlTarget {
            source: "rustlang".to_string(),
            policy: TierPolicy {
                frequency_hours: 2,
                sort: SortMode::Newest,
                time_filter: TimeFilter::Week,
                fetch_limit: 50,
            },
        }
    }

    fn crawler(
        api: Arc<ScriptedApi>,
        store: Arc<LocalStore>,
    ) -> IncrementalCrawler {
        let backend = Arc::new(MemoryCache::new());
        let cache_config = CacheConfig::default();
        IncrementalCrawler::new(
            api,
            store.clone(),
            store,
            CacheStore::new(backend.clone(), &cache_config),
            CacheMetrics::new(backend, &cache_config),
            Deduplicator::new(DedupConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_first_cycle_ingests_batch() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let api = Arc::new(ScriptedApi::new(vec![Ok(vec![
            sample_item("p1", "first post about async runtimes"),
            sample_item("p2", "entirely different gardening topic"),
        ])]));
        let crawler = crawler(api.clone(), store.clone());

        let summary = crawler.run_cycle(&target()).await.unwrap();
        assert_eq!(summary.new_items, 2);
        assert_eq!(summary.duplicates, 0);
        assert!(!summary.from_cache);
        assert_eq!(summary.status, CycleStatus::Completed);

        let wm = WatermarkStore::get(store.as_ref(), "rustlang")
            .await
            .unwrap()
            .unwrap();
        assert!(wm.last_seen_created_at.is_some());
        assert_eq!(wm.total_items_fetched, 2);
    }

    #[tokio::test]
    async fn test_second_cycle_hits_cache_and_folds_duplicates() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let batch = vec![sample_item("p1", "one single post body here")];
        let api = Arc::new(ScriptedApi::new(vec![Ok(batch)]));
        let crawler = crawler(api.clone(), store.clone());

        let first = crawler.run_cycle(&target()).await.unwrap();
        assert_eq!(first.new_items, 1);

        // The batch is still fresh in the cache, so the remote is not
        // consulted again and the re-seen item folds into a duplicate.
        let second = crawler.run_cycle(&target()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.new_items, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_watermark_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(vec![sample_item("p1", "initial content")]),
            Err(AppError::remote(503, "down for maintenance")),
        ]));
        let crawler = crawler(api, store.clone());

        crawler.run_cycle(&target()).await.unwrap();
        let before = WatermarkStore::get(store.as_ref(), "rustlang")
            .await
            .unwrap()
            .unwrap();

        // Force a cache miss so the failing fetch is actually reached.
        crawler.cache.invalidate("rustlang").await.unwrap();
        let err = crawler.run_cycle(&target()).await.unwrap_err();
        assert!(err.is_cycle_wide());

        let after = WatermarkStore::get(store.as_ref(), "rustlang")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_near_duplicates_keep_first_seen() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let api = Arc::new(ScriptedApi::new(vec![Ok(vec![
            sample_item("p1", "rust borrow checker explained step by step"),
            sample_item("p2", "rust borrow checker explained step by step again"),
            sample_item("p3", "completely unrelated gardening tips and tricks"),
        ])]));
        let crawler = crawler(api, store.clone());

        let summary = crawler.run_cycle(&target()).await.unwrap();
        assert_eq!(summary.new_items, 2);
        assert_eq!(summary.duplicates, 1);

        let rows = store.load_current("rustlang").await.unwrap();
        assert_eq!(rows.len(), 2);
        let rep = rows.iter().find(|r| r.source_item_id == "p1").unwrap();
        assert_eq!(rep.duplicate_refs, 1);
        assert!(!rows.iter().any(|r| r.source_item_id == "p2"));

        let wm = WatermarkStore::get(store.as_ref(), "rustlang")
            .await
            .unwrap()
            .unwrap();
        assert!(wm.last_seen_created_at.is_some());
    }

    #[tokio::test]
    async fn test_crawl_batch_isolates_failures() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        // Two targets, one scripted success and one scripted failure;
        // order of arrival is unspecified so the script just alternates.
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(vec![sample_item("p1", "healthy source content")]),
            Err(AppError::remote(500, "boom")),
        ]));
        let crawler = crawler(api, store);

        let mut other = target();
        other.source = "programming".to_string();
        let summaries = crawler
            .crawl_batch(&[target(), other], 2, Duration::from_secs(30))
            .await;

        assert_eq!(summaries.len(), 2);
        let completed = summaries
            .iter()
            .filter(|s| s.status == CycleStatus::Completed)
            .count();
        let failed = summaries
            .iter()
            .filter(|s| s.status == CycleStatus::Failed)
            .count();
        assert_eq!(completed, 1);
        assert_eq!(failed, 1);
    }

    /// API double that hangs on its first call and serves on the next.
    struct SlowThenServeApi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PostApi for SlowThenServeApi {
        async fn fetch_batch(
            &self,
            _source: &str,
            _limit: u32,
            _sort: SortMode,
            _time_filter: TimeFilter,
        ) -> Result<FetchOutcome> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(FetchOutcome {
                items: vec![sample_item("p1", "post that eventually arrives")],
                skipped: 0,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancelled_cycle_can_run_again() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let backend = Arc::new(MemoryCache::new());
        let cache_config = CacheConfig::default();
        let crawler = IncrementalCrawler::new(
            Arc::new(SlowThenServeApi {
                calls: AtomicUsize::new(0),
            }),
            store.clone(),
            store,
            CacheStore::new(backend.clone(), &cache_config),
            CacheMetrics::new(backend, &cache_config),
            Deduplicator::new(DedupConfig::default()),
        );

        let summaries = crawler
            .crawl_batch(&[target()], 1, Duration::from_secs(5))
            .await;
        assert_eq!(summaries[0].status, CycleStatus::Cancelled);

        // The cancelled cycle released its in-flight claim, so the
        // source can be crawled again.
        let summary = crawler.run_cycle(&target()).await.unwrap();
        assert_eq!(summary.status, CycleStatus::Completed);
        assert_eq!(summary.new_items, 1);
    }

    #[tokio::test]
    async fn test_exact_duplicate_still_advances_watermark() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let mut original = sample_item("p1", "identical body content here");
        original.created_at = Utc.timestamp_opt(1_000, 0).unwrap();
        // Same content reposted later under a different id.
        let mut reposted = sample_item("p2", "identical body content here");
        reposted.created_at = Utc.timestamp_opt(5_000, 0).unwrap();

        let api = Arc::new(ScriptedApi::new(vec![
            Ok(vec![original]),
            Ok(vec![reposted]),
        ]));
        let crawler = crawler(api, store.clone());

        crawler.run_cycle(&target()).await.unwrap();
        crawler.cache.invalidate("rustlang").await.unwrap();

        let summary = crawler.run_cycle(&target()).await.unwrap();
        assert_eq!(summary.new_items, 0);
        assert_eq!(summary.duplicates, 1);

        // The duplicate's window still counts as seen, so it is not
        // re-fetched and re-counted forever.
        let wm = WatermarkStore::get(store.as_ref(), "rustlang")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            wm.last_seen_created_at,
            Some(Utc.timestamp_opt(5_000, 0).unwrap())
        );
        assert_eq!(wm.last_seen_item_id, "p2");
    }

    #[tokio::test]
    async fn test_fresh_empty_batch_is_served_from_cache() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let api = Arc::new(ScriptedApi::new(vec![Ok(vec![])]));
        let crawler = crawler(api.clone(), store);

        let first = crawler.run_cycle(&target()).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.new_items, 0);

        // A quiet source's cached empty batch is still a hit.
        let second = crawler.run_cycle(&target()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(api.call_count(), 1);
    }
}
