//! Near-duplicate detection for fetched batches.
//!
//! Candidate pairs come from a cheap shingle pre-filter (an inverted
//! index from word shingles to item positions) so that large batches
//! avoid full O(n²) comparison; tiny batches fall back to exhaustive
//! pairwise comparison because the index setup is not amortized there.
//! Similarity itself is Jaccard over normalized token sets, computed
//! only between candidate pairs. Clustering is union-find with the
//! first-seen item as representative, so output is deterministic for a
//! fixed input and threshold.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::models::{DedupConfig, Item};

/// One cluster of near-identical items.
#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// First-seen member, the one the pipeline keeps
    pub representative: Item,
    /// `source_item_id`s folded into the representative
    pub duplicate_ids: Vec<String>,
    /// Total members in the cluster, representative included
    pub evidence_count: usize,
}

/// Counters describing which algorithmic path a run took.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DedupCounters {
    pub total_posts: usize,
    pub candidate_pairs: usize,
    pub similarity_checks: usize,
    pub fallback_pairs: usize,
}

/// Result of one dedupe pass.
#[derive(Debug)]
pub struct DedupOutcome {
    pub clusters: Vec<ClusterResult>,
    pub counters: DedupCounters,
}

impl DedupOutcome {
    /// Items that were folded away as duplicates.
    pub fn duplicate_count(&self) -> usize {
        self.clusters.iter().map(|c| c.duplicate_ids.len()).sum()
    }
}

/// Text-similarity deduplicator.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Cluster near-duplicates at the configured threshold.
    pub fn dedupe(&self, items: &[Item]) -> DedupOutcome {
        self.dedupe_with_threshold(items, self.config.threshold)
    }

    /// Cluster near-duplicates at an explicit threshold.
    pub fn dedupe_with_threshold(&self, items: &[Item], threshold: f64) -> DedupOutcome {
        let mut counters = DedupCounters {
            total_posts: items.len(),
            ..DedupCounters::default()
        };

        let token_sets: Vec<HashSet<String>> = items
            .iter()
            .map(|item| tokens_of(&item.body_normalized))
            .collect();

        let mut uf = UnionFind::new(items.len());

        if items.len() <= self.config.small_set_cutoff {
            // Exhaustive comparison: cheap enough below the cutoff.
            for i in 0..items.len() {
                for j in (i + 1)..items.len() {
                    counters.fallback_pairs += 1;
                    counters.similarity_checks += 1;
                    if jaccard(&token_sets[i], &token_sets[j]) >= threshold {
                        uf.union(i, j);
                    }
                }
            }
        } else {
            let pairs = self.candidate_pairs(&token_sets);
            counters.candidate_pairs = pairs.len();
            for (i, j) in pairs {
                counters.similarity_checks += 1;
                if jaccard(&token_sets[i], &token_sets[j]) >= threshold {
                    uf.union(i, j);
                }
            }
        }

        let clusters = self.collect_clusters(items, &mut uf);
        DedupOutcome { clusters, counters }
    }

    /// Pairs sharing at least one shingle, in deterministic order.
    fn candidate_pairs(&self, token_sets: &[HashSet<String>]) -> Vec<(usize, usize)> {
        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, tokens) in token_sets.iter().enumerate() {
            for shingle in shingles(tokens, self.config.shingle_size) {
                buckets.entry(shingle).or_default().push(idx);
            }
        }

        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for members in buckets.values() {
            for a in 0..members.len() {
                for b in (a + 1)..members.len() {
                    let pair = (members[a].min(members[b]), members[a].max(members[b]));
                    if seen.insert(pair) {
                        pairs.push(pair);
                    }
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }

    fn collect_clusters(&self, items: &[Item], uf: &mut UnionFind) -> Vec<ClusterResult> {
        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        for idx in 0..items.len() {
            members.entry(uf.find(idx)).or_default().push(idx);
        }

        // Order clusters by their first-seen member.
        let mut roots: Vec<(usize, Vec<usize>)> = members
            .into_iter()
            .map(|(_, mut idxs)| {
                idxs.sort_unstable();
                (idxs[0], idxs)
            })
            .collect();
        roots.sort_unstable_by_key(|(first, _)| *first);

        roots
            .into_iter()
            .map(|(first, idxs)| ClusterResult {
                representative: items[first].clone(),
                duplicate_ids: idxs[1..]
                    .iter()
                    .map(|&i| items[i].source_item_id.clone())
                    .collect(),
                evidence_count: idxs.len(),
            })
            .collect()
    }
}

/// Word tokens of a normalized body.
fn tokens_of(normalized: &str) -> HashSet<String> {
    normalized.unicode_words().map(String::from).collect()
}

/// Word shingles used as pre-filter keys. Texts shorter than one shingle
/// fall back to their individual tokens so they still land in buckets.
fn shingles(tokens: &HashSet<String>, size: usize) -> Vec<String> {
    let mut sorted: Vec<&String> = tokens.iter().collect();
    sorted.sort();

    if sorted.len() < size {
        return sorted.into_iter().cloned().collect();
    }
    sorted
        .windows(size)
        .map(|window| {
            window
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Jaccard similarity of two token sets. Two empty sets are identical.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Union-find with path compression.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Smaller root wins so the representative is first-seen.
            let (keep, fold) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[fold] = keep;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::sample_item;

    fn dedup() -> Deduplicator {
        Deduplicator::new(DedupConfig::default())
    }

    #[test]
    fn test_near_duplicates_cluster() {
        let items = vec![
            sample_item("a", "rust borrow checker explained for beginners today"),
            sample_item("b", "rust borrow checker explained for beginners"),
            sample_item("c", "completely unrelated gardening tips and tricks"),
        ];

        let outcome = dedup().dedupe_with_threshold(&items, 0.7);
        assert_eq!(outcome.clusters.len(), 2);
        assert_eq!(outcome.duplicate_count(), 1);

        let cluster = &outcome.clusters[0];
        assert_eq!(cluster.representative.source_item_id, "a");
        assert_eq!(cluster.duplicate_ids, vec!["b".to_string()]);
        assert_eq!(cluster.evidence_count, 2);
    }

    #[test]
    fn test_below_threshold_stays_singleton() {
        let items = vec![
            sample_item("a", "one two three four five"),
            sample_item("b", "six seven eight nine ten"),
        ];
        let outcome = dedup().dedupe_with_threshold(&items, 0.5);
        assert_eq!(outcome.clusters.len(), 2);
        assert!(outcome.clusters.iter().all(|c| c.duplicate_ids.is_empty()));
    }

    #[test]
    fn test_small_batch_takes_fallback_path() {
        let items: Vec<Item> = (0..4)
            .map(|i| sample_item(&format!("p{i}"), &format!("text number {i}")))
            .collect();
        let outcome = dedup().dedupe(&items);

        assert_eq!(outcome.counters.total_posts, 4);
        assert_eq!(outcome.counters.fallback_pairs, 6); // C(4,2)
        assert_eq!(outcome.counters.candidate_pairs, 0);
        assert_eq!(outcome.counters.similarity_checks, 6);
    }

    #[test]
    fn test_large_batch_takes_prefilter_path() {
        let mut items: Vec<Item> = (0..20)
            .map(|i| {
                sample_item(
                    &format!("p{i}"),
                    &format!("unique{i} word{i} thing{i} topic{i} subject{i}"),
                )
            })
            .collect();
        items.push(sample_item(
            "dup",
            "unique0 word0 thing0 topic0 subject0",
        ));

        let outcome = dedup().dedupe_with_threshold(&items, 0.8);
        assert_eq!(outcome.counters.fallback_pairs, 0);
        assert!(outcome.counters.candidate_pairs > 0);
        // Pre-filter must cut the pair space well below exhaustive C(21,2).
        assert!(outcome.counters.candidate_pairs < 210);
        assert_eq!(outcome.duplicate_count(), 1);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let items = vec![
            sample_item("a", "alpha beta gamma delta"),
            sample_item("b", "alpha beta gamma delta epsilon"),
            sample_item("c", "alpha beta gamma delta"),
        ];
        let first = dedup().dedupe_with_threshold(&items, 0.7);
        let second = dedup().dedupe_with_threshold(&items, 0.7);

        assert_eq!(first.clusters.len(), second.clusters.len());
        for (x, y) in first.clusters.iter().zip(second.clusters.iter()) {
            assert_eq!(
                x.representative.source_item_id,
                y.representative.source_item_id
            );
            assert_eq!(x.duplicate_ids, y.duplicate_ids);
        }
    }

    #[test]
    fn test_idempotent_on_representatives() {
        let items = vec![
            sample_item("a", "rust async runtime comparison tokio"),
            sample_item("b", "rust async runtime comparison tokio again"),
            sample_item("c", "gardening in small urban spaces guide"),
        ];
        let first = dedup().dedupe_with_threshold(&items, 0.6);
        let reps: Vec<Item> = first
            .clusters
            .iter()
            .map(|c| c.representative.clone())
            .collect();

        let second = dedup().dedupe_with_threshold(&reps, 0.6);
        assert_eq!(second.clusters.len(), first.clusters.len());
    }

    #[test]
    fn test_empty_input() {
        let outcome = dedup().dedupe(&[]);
        assert!(outcome.clusters.is_empty());
        assert_eq!(outcome.counters.total_posts, 0);
    }
}
