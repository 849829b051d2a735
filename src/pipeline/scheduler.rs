//! Periodic scheduling loop.
//!
//! Each sweep asks the tiering pass for due sources, wraps every one in
//! an audited task, and runs them through the executor with bounded
//! concurrency. Between sweeps the loop sleeps for whatever period the
//! adaptive controller currently recommends. A slower maintenance timer
//! recomputes tier assignments and pushes old items into the cold
//! archive.

use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, stream};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::Result;
use crate::models::{Config, CycleStatus, CycleSummary, TaskRecord};
use crate::pipeline::adaptive::AdaptiveFrequencyController;
use crate::pipeline::crawl::CrawlTarget;
use crate::pipeline::executor::TaskExecutor;
use crate::pipeline::tiering::TieredScheduler;
use crate::store::{ItemStore, TaskStore};

/// Long-running sweep loop over all configured sources.
pub struct PeriodicScheduler {
    executor: Arc<TaskExecutor>,
    tiering: TieredScheduler,
    adaptive: AdaptiveFrequencyController,
    items: Arc<dyn ItemStore>,
    tasks: Arc<dyn TaskStore>,
    config: Config,
}

impl PeriodicScheduler {
    pub fn new(
        executor: Arc<TaskExecutor>,
        tiering: TieredScheduler,
        adaptive: AdaptiveFrequencyController,
        items: Arc<dyn ItemStore>,
        tasks: Arc<dyn TaskStore>,
        config: Config,
    ) -> Self {
        Self {
            executor,
            tiering,
            adaptive,
            items,
            tasks,
            config,
        }
    }

    /// Run sweeps until the shutdown flag flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let maintenance_every =
            std::time::Duration::from_secs(self.config.scheduler.maintenance_interval_secs);
        let mut next_maintenance = Instant::now();

        loop {
            if Instant::now() >= next_maintenance {
                if let Err(e) = self.run_maintenance().await {
                    log::error!("Maintenance pass failed: {}", e);
                }
                next_maintenance = Instant::now() + maintenance_every;
            }

            let summaries = self.sweep_once().await?;
            let completed = summaries
                .iter()
                .filter(|s| s.status == CycleStatus::Completed)
                .count();
            log::info!(
                "Sweep finished: {}/{} cycles completed",
                completed,
                summaries.len()
            );

            let period = self.adaptive.current_period().await?;
            log::debug!("Next sweep in {:?}", period);
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("Shutdown requested, stopping scheduler");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one sweep over all currently due sources.
    pub async fn sweep_once(&self) -> Result<Vec<CycleSummary>> {
        let targets = self.tiering.due_targets(Utc::now()).await?;
        if targets.is_empty() {
            log::debug!("No sources due this sweep");
            return Ok(Vec::new());
        }
        log::info!("Sweeping {} due sources", targets.len());

        let summaries = stream::iter(targets)
            .map(|target| async move {
                match self.dispatch(&target).await {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        log::error!("Task for {} exhausted retries: {}", target.source, e);
                        None
                    }
                }
            })
            .buffer_unordered(self.config.scheduler.worker_count)
            .filter_map(|s| async move { s })
            .collect()
            .await;
        Ok(summaries)
    }

    /// Wrap one target in an audited task and execute it.
    async fn dispatch(&self, target: &CrawlTarget) -> Result<CycleSummary> {
        let task_id = format!("{}-{}", target.source, Utc::now().timestamp_millis());
        self.tasks.create(&TaskRecord::new(&task_id)).await?;
        self.executor.execute(&task_id, target).await
    }

    /// Recompute tier assignments and archive aged-out items.
    pub async fn run_maintenance(&self) -> Result<()> {
        let report = self
            .tiering
            .recompute_assignments(&self.config.sources, &self.config.blacklist)
            .await?;
        log::info!(
            "Tiering pass: {} sources, {} reassigned, {} blacklisted",
            report.total,
            report.changed,
            report.blacklisted
        );

        let cutoff =
            Utc::now() - chrono::Duration::days(i64::from(self.config.storage.retention_days));
        for source in &self.config.sources {
            let moved = self.items.archive_older_than(source, cutoff).await?;
            if moved > 0 {
                log::info!("Archived {} items from {}", moved, source);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMetrics, MemoryCache};
    use crate::error::AppError;
    use crate::models::TaskStatus;
    use crate::pipeline::crawl::CycleRunner;
    use crate::store::{LocalStore, ProfileStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingRunner {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CycleRunner for CountingRunner {
        async fn run_cycle(&self, target: &CrawlTarget) -> Result<CycleSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::remote(500, "down"));
            }
            let mut summary = CycleSummary::started(&target.source);
            summary.new_items = 12;
            summary.status = CycleStatus::Completed;
            Ok(summary)
        }
    }

    fn scheduler_with(
        store: Arc<LocalStore>,
        runner: Arc<CountingRunner>,
        config: Config,
    ) -> PeriodicScheduler {
        let backend = Arc::new(MemoryCache::new());
        let metrics = CacheMetrics::new(backend, &config.cache);
        PeriodicScheduler::new(
            Arc::new(TaskExecutor::new(
                runner,
                store.clone(),
                store.clone(),
                config.executor.clone(),
            )),
            TieredScheduler::new(store.clone(), config.tiers.clone()),
            AdaptiveFrequencyController::new(metrics, config.adaptive.clone()),
            store.clone(),
            store,
            config,
        )
    }

    fn config(sources: &[&str]) -> Config {
        Config {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_bootstraps_new_sources() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let scheduler = scheduler_with(store.clone(), runner.clone(), config(&["rustlang"]));

        // Maintenance seeds the profile; the sweep then bootstraps it.
        scheduler.run_maintenance().await.unwrap();
        let summaries = scheduler.sweep_once().await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summaries[0].new_items, 12);

        // The cycle left an audit record behind.
        let tasks = TaskStore::all(store.as_ref()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);

        // And the profile now carries crawl history.
        let profile = ProfileStore::get(store.as_ref(), "rustlang")
            .await
            .unwrap()
            .unwrap();
        assert!(profile.last_crawled_at.is_some());
    }

    #[tokio::test]
    async fn test_sweep_skips_blacklisted_sources() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let mut config = config(&["rustlang", "banned"]);
        config.blacklist = vec!["banned".to_string()];
        let scheduler = scheduler_with(store, runner.clone(), config);

        scheduler.run_maintenance().await.unwrap();
        let summaries = scheduler.sweep_once().await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].source, "rustlang");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_survives_dead_lettered_task() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let scheduler = scheduler_with(store.clone(), runner, config(&["rustlang"]));

        scheduler.run_maintenance().await.unwrap();
        let summaries = scheduler.sweep_once().await.unwrap();
        assert!(summaries.is_empty());

        let tasks = TaskStore::all(store.as_ref()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::DeadLettered);
    }

    #[tokio::test]
    async fn test_nothing_due_is_quiet() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        // No maintenance pass, so no profiles exist and nothing is due.
        let scheduler = scheduler_with(store, runner.clone(), config(&["rustlang"]));

        let summaries = scheduler.sweep_once().await.unwrap();
        assert!(summaries.is_empty());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let scheduler = scheduler_with(store, runner, config(&["rustlang"]));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        // Let the first sweep complete, then flip the flag.
        tokio::task::yield_now().await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
