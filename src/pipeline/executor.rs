//! Task execution over the state machine.
//!
//! The executor wraps one crawl cycle in a [`TaskRecord`], persisting
//! every transition so the audit trail survives a crash mid-attempt.
//! Failures are classified, retried with exponential backoff up to the
//! configured limit, then dead-lettered exactly once. Quality profiles
//! are only updated on success.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{
    CycleSummary, ExecutorConfig, FailureCategory, SourceQualityProfile, TaskStatus,
};
use crate::pipeline::crawl::{CrawlTarget, CycleRunner};
use crate::store::{ProfileStore, TaskStore};

/// Retry-aware driver for crawl-cycle tasks.
pub struct TaskExecutor {
    runner: Arc<dyn CycleRunner>,
    tasks: Arc<dyn TaskStore>,
    profiles: Arc<dyn ProfileStore>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        runner: Arc<dyn CycleRunner>,
        tasks: Arc<dyn TaskStore>,
        profiles: Arc<dyn ProfileStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            runner,
            tasks,
            profiles,
            config,
        }
    }

    /// Delay before retry number `retry` (1-based), capped.
    fn backoff(&self, retry: u32) -> Duration {
        let base = self.config.backoff_base_secs;
        let exp = base.saturating_mul(1u64 << (retry.saturating_sub(1)).min(32));
        Duration::from_secs(exp.min(self.config.backoff_cap_secs))
    }

    /// Execute the task until it reaches a terminal status.
    ///
    /// The task must already exist in the store with `Pending` status.
    /// Returns the successful cycle summary, or the last error once the
    /// task has been dead-lettered.
    pub async fn execute(&self, task_id: &str, target: &CrawlTarget) -> Result<CycleSummary> {
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("unknown task {}", task_id)))?;

        loop {
            task.transition(TaskStatus::Processing)?;
            task.progress_percent = 10;
            self.tasks.update(&task).await?;

            task.progress_percent = 25;
            self.tasks.update(&task).await?;

            match self.runner.run_cycle(target).await {
                Ok(summary) => {
                    task.progress_percent = 50;
                    self.tasks.update(&task).await?;

                    self.record_success(&summary).await?;
                    task.progress_percent = 75;
                    self.tasks.update(&task).await?;

                    task.transition(TaskStatus::Completed)?;
                    self.tasks.update(&task).await?;
                    log::info!("Task {} completed for {}", task.id, target.source);
                    return Ok(summary);
                }
                Err(error) => {
                    let category = FailureCategory::from_error(&error);
                    task.record_failure(category, error.to_string());
                    task.transition(TaskStatus::Failed)?;
                    self.tasks.update(&task).await?;
                    log::warn!(
                        "Task {} attempt failed ({}): {}",
                        task.id,
                        category.as_str(),
                        error
                    );

                    if !error.is_retryable() {
                        task.transition(TaskStatus::DeadLettered)?;
                        self.tasks.update(&task).await?;
                        log::error!(
                            "Task {} dead-lettered without retry: {}",
                            task.id,
                            error
                        );
                        return Err(error);
                    }

                    if task.retry_count >= self.config.max_retries {
                        task.transition(TaskStatus::DeadLettered)?;
                        self.tasks.update(&task).await?;
                        log::error!(
                            "Task {} dead-lettered after {} retries",
                            task.id,
                            task.retry_count
                        );
                        return Err(error);
                    }

                    task.retry_count += 1;
                    task.last_retry_at = Some(Utc::now());
                    task.transition(TaskStatus::Pending)?;
                    self.tasks.update(&task).await?;

                    let delay = self.backoff(task.retry_count);
                    log::info!(
                        "Task {} retry {}/{} in {:?}",
                        task.id,
                        task.retry_count,
                        self.config.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fold a completed cycle into the source's quality profile.
    async fn record_success(&self, summary: &CycleSummary) -> Result<()> {
        let mut profile = self
            .profiles
            .get(&summary.source)
            .await?
            .unwrap_or_else(|| SourceQualityProfile::new(summary.source.clone()));

        let fetched = summary.accepted() + summary.duplicates;
        let dedup_rate = if fetched > 0 {
            summary.duplicates as f64 / fetched as f64 * 100.0
        } else {
            0.0
        };
        profile.record_cycle(summary.accepted(), dedup_rate, Utc::now());
        self.profiles.put_batch(std::slice::from_ref(&profile)).await
    }
}
