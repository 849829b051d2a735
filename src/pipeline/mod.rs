//! Crawl pipeline: incremental cycles, tiering, adaptive frequency,
//! task execution, and the periodic scheduling loop.
//!
//! The pieces compose in one direction only: the scheduler asks the
//! tiering pass which sources are due, wraps each in a task, and hands
//! it to the executor, which drives the crawler through the task state
//! machine. Nothing lower in the stack knows about tasks or sweeps.

pub mod adaptive;
pub mod crawl;
pub mod executor;
pub mod scheduler;
pub mod tiering;

pub use adaptive::AdaptiveFrequencyController;
pub use crawl::{CrawlTarget, CycleRunner, IncrementalCrawler};
pub use executor::TaskExecutor;
pub use scheduler::PeriodicScheduler;
pub use tiering::{TieredScheduler, TieringReport};
