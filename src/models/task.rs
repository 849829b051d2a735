// src/models/task.rs

//! Task execution records and the status state machine.
//!
//! Allowed transitions:
//!
//! ```text
//! Pending -> Processing -> Completed
//!                       -> Failed -> Pending       (retry, bounded)
//!                                 -> DeadLettered  (retries exhausted)
//! ```
//!
//! Anything else is rejected with [`AppError::IllegalTransition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLettered,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::DeadLettered => "dead_lettered",
        }
    }

    /// Whether `self -> next` is a legal state-machine edge.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
                | (Failed, DeadLettered)
        )
    }

    /// Whether the status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::DeadLettered)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure classification used by the retry policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    NetworkError,
    ProcessingError,
    DataValidationError,
    SystemError,
}

impl FailureCategory {
    /// Map an error to its retry category.
    pub fn from_error(error: &AppError) -> Self {
        match error {
            AppError::Http(_) | AppError::RemoteUnavailable { .. } | AppError::Auth(_) => {
                FailureCategory::NetworkError
            }
            AppError::MalformedResponse(_) | AppError::Json(_) | AppError::Crawl { .. } => {
                FailureCategory::ProcessingError
            }
            AppError::Validation(_) => FailureCategory::DataValidationError,
            _ => FailureCategory::SystemError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::NetworkError => "network_error",
            FailureCategory::ProcessingError => "processing_error",
            FailureCategory::DataValidationError => "data_validation_error",
            FailureCategory::SystemError => "system_error",
        }
    }
}

/// One execution-attempt group, retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    /// Task identifier
    pub id: String,

    /// Current state-machine status
    pub status: TaskStatus,

    /// Last reported progress milestone, 0-100
    pub progress_percent: u8,

    /// Number of retries consumed so far
    pub retry_count: u32,

    /// Classification of the most recent failure
    pub failure_category: Option<FailureCategory>,

    /// Message of the most recent failure
    pub error_message: Option<String>,

    /// When the most recent retry was scheduled
    pub last_retry_at: Option<DateTime<Utc>>,

    /// When the task was dead-lettered
    pub dead_letter_at: Option<DateTime<Utc>>,

    /// When processing first started
    pub started_at: Option<DateTime<Utc>>,

    /// Set iff the task reached `Completed`
    pub completed_at: Option<DateTime<Utc>>,

    /// When the task was scheduled
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a freshly scheduled task.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            progress_percent: 0,
            retry_count: 0,
            failure_category: None,
            error_message: None,
            last_retry_at: None,
            dead_letter_at: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Apply a status transition, rejecting illegal edges.
    ///
    /// Timestamps tied to a status (`started_at`, `completed_at`,
    /// `dead_letter_at`) are stamped here so they cannot drift from the
    /// status value.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::illegal_transition(self.status, next));
        }

        let now = Utc::now();
        match next {
            TaskStatus::Processing => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            TaskStatus::Completed => {
                self.completed_at = Some(now);
                self.progress_percent = 100;
                self.failure_category = None;
                self.error_message = None;
            }
            TaskStatus::DeadLettered => {
                self.dead_letter_at = Some(now);
            }
            TaskStatus::Pending | TaskStatus::Failed => {}
        }

        self.status = next;
        Ok(())
    }

    /// Record a failure classification on the way into `Failed`.
    pub fn record_failure(&mut self, category: FailureCategory, message: impl Into<String>) {
        self.failure_category = Some(category);
        self.error_message = Some(message.into());
    }
}
