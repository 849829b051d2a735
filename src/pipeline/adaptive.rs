//! Adaptive sweep-period control.
//!
//! The sweep period tracks cache efficiency: a hot cache means the
//! remote is quiet and sweeps can relax; a cold cache means content is
//! moving faster than we poll and sweeps tighten. A window with no
//! metric data reads as a 0.0 hit rate and therefore tightens, which is
//! the safe direction after a restart.

use std::time::Duration;

use crate::cache::CacheMetrics;
use crate::error::Result;
use crate::models::AdaptiveConfig;

/// Hit-rate-driven sweep period controller.
pub struct AdaptiveFrequencyController {
    metrics: CacheMetrics,
    config: AdaptiveConfig,
}

impl AdaptiveFrequencyController {
    pub fn new(metrics: CacheMetrics, config: AdaptiveConfig) -> Self {
        Self { metrics, config }
    }

    /// Map a hit rate onto a sweep period.
    pub fn period_for(config: &AdaptiveConfig, hit_rate: f64) -> Duration {
        let hours = if hit_rate > config.high_cutoff {
            config.relaxed_period_hours
        } else if hit_rate < config.low_cutoff {
            config.tight_period_hours
        } else {
            config.normal_period_hours
        };
        Duration::from_secs(u64::from(hours) * 3600)
    }

    /// Sweep period derived from the current trailing hit rate.
    pub async fn current_period(&self) -> Result<Duration> {
        let rate = self.metrics.hit_rate(self.config.window_minutes).await?;
        let period = Self::period_for(&self.config, rate);
        log::debug!(
            "Hit rate {:.2} over {}min -> sweep period {:?}",
            rate,
            self.config.window_minutes,
            period
        );
        Ok(period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::CacheConfig;
    use std::sync::Arc;

    fn hours(n: u64) -> Duration {
        Duration::from_secs(n * 3600)
    }

    #[test]
    fn test_period_bands() {
        let config = AdaptiveConfig::default();
        assert_eq!(AdaptiveFrequencyController::period_for(&config, 0.95), hours(4));
        assert_eq!(AdaptiveFrequencyController::period_for(&config, 0.9), hours(2));
        assert_eq!(AdaptiveFrequencyController::period_for(&config, 0.8), hours(2));
        assert_eq!(AdaptiveFrequencyController::period_for(&config, 0.7), hours(2));
        assert_eq!(AdaptiveFrequencyController::period_for(&config, 0.5), hours(1));
    }

    #[tokio::test]
    async fn test_empty_window_tightens() {
        let backend = Arc::new(MemoryCache::new());
        let controller = AdaptiveFrequencyController::new(
            CacheMetrics::new(backend, &CacheConfig::default()),
            AdaptiveConfig::default(),
        );
        // No data reads as 0.0, which is below the low cutoff.
        assert_eq!(controller.current_period().await.unwrap(), hours(1));
    }

    #[tokio::test]
    async fn test_hot_cache_relaxes() {
        let backend = Arc::new(MemoryCache::new());
        let metrics = CacheMetrics::new(backend, &CacheConfig::default());
        for _ in 0..19 {
            metrics.record_hit().await.unwrap();
        }
        metrics.record_miss().await.unwrap();

        let controller =
            AdaptiveFrequencyController::new(metrics, AdaptiveConfig::default());
        // 19/20 = 0.95 > 0.9.
        assert_eq!(controller.current_period().await.unwrap(), hours(4));
    }
}
