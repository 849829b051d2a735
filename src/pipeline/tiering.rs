//! Tier assignment over source quality profiles.
//!
//! Sources are bucketed by their rolling average of valid items per
//! cycle. The pass is idempotent: running it twice against unchanged
//! profiles writes nothing the second time, so it can sit on a
//! maintenance timer without churning the profile store.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{SourceQualityProfile, Tier, TierConfig};
use crate::pipeline::crawl::CrawlTarget;
use crate::store::ProfileStore;

/// Outcome of one tier recomputation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TieringReport {
    /// Profiles examined
    pub total: usize,
    /// Profiles whose assignment changed and were rewritten
    pub changed: usize,
    /// Profiles currently excluded as blacklisted
    pub blacklisted: usize,
}

/// Tier-driven source scheduler.
pub struct TieredScheduler {
    profiles: Arc<dyn ProfileStore>,
    config: TierConfig,
}

impl TieredScheduler {
    pub fn new(profiles: Arc<dyn ProfileStore>, config: TierConfig) -> Self {
        Self { profiles, config }
    }

    /// Classify one profile into its tier.
    ///
    /// Blacklisting wins over everything; a source with no positive
    /// rolling average has no data to judge; everything else falls into
    /// a bucket by `avg_valid_items`.
    pub fn classify(config: &TierConfig, profile: &SourceQualityProfile) -> Tier {
        if profile.is_blacklisted {
            return Tier::Blacklisted;
        }
        if profile.avg_valid_items > config.tier1_min_avg {
            Tier::Tier1
        } else if profile.avg_valid_items > config.tier2_min_avg {
            Tier::Tier2
        } else if profile.avg_valid_items > 0.0 {
            Tier::Tier3
        } else {
            Tier::NoData
        }
    }

    /// Recompute tier assignments for all configured sources.
    ///
    /// Sources without a profile yet are seeded as `NoData`; the
    /// blacklist is applied before classification. Only profiles whose
    /// assignment actually changed are written back.
    pub async fn recompute_assignments(
        &self,
        sources: &[String],
        blacklist: &[String],
    ) -> Result<TieringReport> {
        let existing = self.profiles.all().await?;
        let mut report = TieringReport::default();
        let mut dirty = Vec::new();

        let mut by_source: std::collections::HashMap<String, SourceQualityProfile> = existing
            .into_iter()
            .map(|profile| (profile.source.clone(), profile))
            .collect();

        for source in sources {
            let (profile, existed) = match by_source.remove(source) {
                Some(profile) => (profile, true),
                None => (SourceQualityProfile::new(source.clone()), false),
            };
            report.total += 1;

            let mut next = profile.clone();
            next.is_blacklisted = blacklist.contains(source);
            next.tier = Self::classify(&self.config, &next);
            if let Some(policy) = self.config.policy_for(next.tier) {
                next.crawl_frequency_hours = policy.frequency_hours;
            }
            if next.is_blacklisted {
                report.blacklisted += 1;
            }

            // A seeded profile must be written even when classification
            // leaves it untouched, or the source never enters the store
            // and never becomes due.
            if !existed || next != profile {
                log::info!(
                    "Source {} assigned {} (avg {:.1})",
                    next.source,
                    next.tier.as_str(),
                    next.avg_valid_items
                );
                dirty.push(next);
            }
        }

        report.changed = dirty.len();
        if !dirty.is_empty() {
            self.profiles.put_batch(&dirty).await?;
        }
        Ok(report)
    }

    /// Targets due for a crawl at `now`.
    ///
    /// A brand-new source has no tier yet but still has to be crawled
    /// once to gather data, so never-crawled unblacklisted sources get
    /// a bootstrap cycle on the tier3 policy.
    pub async fn due_targets(&self, now: DateTime<Utc>) -> Result<Vec<CrawlTarget>> {
        let profiles = self.profiles.all().await?;
        let mut targets = Vec::new();

        for profile in profiles {
            if profile.is_blacklisted {
                continue;
            }
            if let Some(policy) = self.config.policy_for(profile.tier) {
                if profile.is_due(now) {
                    targets.push(CrawlTarget {
                        source: profile.source,
                        policy,
                    });
                }
            } else if profile.last_crawled_at.is_none() {
                log::debug!("Bootstrapping never-crawled source {}", profile.source);
                targets.push(CrawlTarget {
                    source: profile.source,
                    policy: self.config.tier3,
                });
            }
        }
        Ok(targets)
    }
}
