// src/bin/cli.rs

//! gleaner: adaptive community-post ingestion CLI
//!
//! Entry point for running the scheduler loop locally, firing single
//! crawl cycles, and inspecting tiers, watermarks, and task records.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use gleaner::cache::{CacheMetrics, CacheStore, MemoryCache};
use gleaner::client::ApiClient;
use gleaner::dedup::Deduplicator;
use gleaner::error::Result;
use gleaner::models::Config;
use gleaner::pipeline::crawl::CycleRunner;
use gleaner::pipeline::{
    AdaptiveFrequencyController, CrawlTarget, IncrementalCrawler, PeriodicScheduler,
    TaskExecutor, TieredScheduler,
};
use gleaner::store::{LocalStore, ProfileStore, TaskStore, WatermarkStore};

#[derive(Parser, Debug)]
#[command(
    name = "gleaner",
    version,
    about = "Adaptive ingestion pipeline for community discussion posts"
)]

/// CLI Arguments
struct Cli {
    #[arg(short, long, default_value = "data/config.toml")]
    config: String,

    #[arg(long, default_value = "data/store")]
    storage_dir: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI Commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the periodic scheduler until interrupted
    Run,
    /// Run one crawl cycle for a single source
    Cycle {
        source: String,
    },
    /// Recompute and print tier assignments
    Tiers,
    /// Validate the configuration file
    Validate,
    /// Print watermarks and task records
    Info,
}

/// Shared component wiring for the crawl commands.
struct App {
    store: Arc<LocalStore>,
    metrics: CacheMetrics,
    crawler: Arc<IncrementalCrawler>,
    config: Config,
}

impl App {
    fn build(config: Config, storage_dir: &PathBuf) -> Result<Self> {
        let store = Arc::new(LocalStore::new(storage_dir.clone()));
        let backend = Arc::new(MemoryCache::new());
        let cache = CacheStore::new(backend.clone(), &config.cache);
        let metrics = CacheMetrics::new(backend, &config.cache);

        let api = Arc::new(ApiClient::new(config.client.clone(), &config.rate_limit)?);
        let crawler = Arc::new(IncrementalCrawler::new(
            api,
            store.clone(),
            store.clone(),
            cache,
            metrics.clone(),
            Deduplicator::new(config.dedup.clone()),
        ));

        Ok(Self {
            store,
            metrics,
            crawler,
            config,
        })
    }

    fn scheduler(self) -> PeriodicScheduler {
        let executor = Arc::new(TaskExecutor::new(
            self.crawler,
            self.store.clone(),
            self.store.clone(),
            self.config.executor.clone(),
        ));
        let tiering = TieredScheduler::new(self.store.clone(), self.config.tiers.clone());
        let adaptive =
            AdaptiveFrequencyController::new(self.metrics, self.config.adaptive.clone());
        PeriodicScheduler::new(
            executor,
            tiering,
            adaptive,
            self.store.clone(),
            self.store,
            self.config,
        )
    }
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = Config::load_or_default(&cli.config);
    if config.client.client_secret.is_empty() {
        if let Ok(secret) = std::env::var("GLEANER_CLIENT_SECRET") {
            config.client.client_secret = secret;
        }
    }

    match cli.command {
        Command::Run => {
            config.validate()?;
            let scheduler = App::build(config, &cli.storage_dir)?.scheduler();

            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Interrupt received");
                    let _ = tx.send(true);
                }
            });
            scheduler.run(rx).await?;
        }
        Command::Cycle { source } => {
            config.validate()?;
            let app = App::build(config, &cli.storage_dir)?;

            // Crawl on the source's assigned policy, or the conservative
            // tier3 policy if it has never been tiered.
            let policy = match ProfileStore::get(app.store.as_ref(), &source).await? {
                Some(profile) => app
                    .config
                    .tiers
                    .policy_for(profile.tier)
                    .unwrap_or(app.config.tiers.tier3),
                None => app.config.tiers.tier3,
            };
            let summary = app
                .crawler
                .run_cycle(&CrawlTarget {
                    source,
                    policy,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Tiers => {
            config.validate()?;
            let app = App::build(config, &cli.storage_dir)?;
            let tiering = TieredScheduler::new(app.store.clone(), app.config.tiers.clone());
            let report = tiering
                .recompute_assignments(&app.config.sources, &app.config.blacklist)
                .await?;
            println!(
                "{} sources, {} reassigned, {} blacklisted",
                report.total, report.changed, report.blacklisted
            );

            for profile in ProfileStore::all(app.store.as_ref()).await? {
                println!(
                    "{:<24} {:<12} every {:>3}h  avg {:>6.1}  score {:>6.1}",
                    profile.source,
                    profile.tier.as_str(),
                    profile.crawl_frequency_hours,
                    profile.avg_valid_items,
                    profile.quality_score
                );
            }
        }
        Command::Validate => {
            config.validate()?;
            println!("Configuration OK: {} sources", config.sources.len());
        }
        Command::Info => {
            let app = App::build(config, &cli.storage_dir)?;
            println!("Watermarks:");
            for wm in WatermarkStore::all(app.store.as_ref()).await? {
                println!(
                    "  {:<24} last {:?} total {} dedup {:.1}%",
                    wm.source, wm.last_seen_created_at, wm.total_items_fetched, wm.dedup_rate
                );
            }
            println!("Tasks:");
            for task in TaskStore::all(app.store.as_ref()).await? {
                println!(
                    "  {:<40} {:<14} retries {} progress {}%",
                    task.id, task.status, task.retry_count, task.progress_percent
                );
            }
        }
    }

    Ok(())
}
