//! Task definition, status, and validation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Longest accepted task id.
pub const MAX_ID_LEN: usize = 100;

/// Kind of work a task describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Plain task with a free-form payload.
    #[default]
    Generic,
    /// Task defined by a collaborator-specific payload.
    Custom,
    /// Task tracking an issue in an external tracker.
    GithubIssue,
    /// Task tracking a pull request in an external tracker.
    GithubPr,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Generic,
        TaskType::Custom,
        TaskType::GithubIssue,
        TaskType::GithubPr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Generic => "generic",
            TaskType::Custom => "custom",
            TaskType::GithubIssue => "github-issue",
            TaskType::GithubPr => "github-pr",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| QueueError::validation("type", format!("unknown task type '{}'", s)))
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in queue.
    #[default]
    Pending,
    /// Claimed by a caller.
    InProgress,
    /// Completed successfully.
    Completed,
    /// Failed with no retries left.
    Failed,
    /// Timed out with no retries left.
    Timeout,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Timeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }

    /// Eligible for `get_next`.
    pub fn is_claimable(self) -> bool {
        self == TaskStatus::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| QueueError::validation("status", format!("unknown status '{}'", s)))
    }
}

/// Accepted priority range and the value used when none is given.
///
/// Higher numbers are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityBounds {
    pub min: u8,
    pub max: u8,
    pub default: u8,
}

impl Default for PriorityBounds {
    fn default() -> Self {
        Self {
            min: 1,
            max: 10,
            default: 5,
        }
    }
}

impl From<&spool_config::QueueConfig> for PriorityBounds {
    fn from(config: &spool_config::QueueConfig) -> Self {
        Self {
            min: config.min_priority,
            max: config.max_priority,
            default: config.default_priority,
        }
    }
}

/// A task in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: String,
    /// Task kind.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Current status.
    pub status: TaskStatus,
    /// Task priority (higher runs first).
    pub priority: u8,
    /// Opaque work description.
    pub payload: String,
    /// Number of retries consumed.
    pub retry_count: u32,
    /// Maximum retries allowed.
    pub max_retries: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Issue or PR identifier, never interpreted by the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    /// Last failure or timeout reason reported by a caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Task {
    /// Build a pending task from a request, with an already reserved id.
    pub fn from_new(
        id: String,
        new: NewTask,
        bounds: &PriorityBounds,
        default_max_retries: u32,
    ) -> Result<Self, QueueError> {
        validate_id(&id)?;
        let priority = validate_priority(new.priority.unwrap_or(bounds.default), bounds)?;
        let now = Utc::now();
        Ok(Self {
            id,
            task_type: new.task_type,
            status: TaskStatus::Pending,
            priority,
            payload: new.payload,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(default_max_retries),
            created_at: now,
            updated_at: now,
            external_ref: new.external_ref,
            last_error: None,
        })
    }

    /// Check if task can be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Bump `updated_at`, never moving it before `created_at`.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }

    /// Check a task about to enter the queue: structure plus the configured
    /// priority bounds.
    pub fn validate(&self, bounds: &PriorityBounds) -> Result<(), QueueError> {
        self.check_structure()?;
        validate_priority(self.priority, bounds)?;
        Ok(())
    }

    /// Check the invariants that hold for any stored task, whatever the
    /// priority bounds were when it was added.
    pub fn check_structure(&self) -> Result<(), QueueError> {
        validate_id(&self.id)?;
        if self.retry_count > self.max_retries {
            return Err(QueueError::validation(
                "retry_count",
                format!(
                    "retry_count {} exceeds max_retries {} for task {}",
                    self.retry_count, self.max_retries, self.id
                ),
            ));
        }
        if self.updated_at < self.created_at {
            return Err(QueueError::validation(
                "updated_at",
                format!("updated_at precedes created_at for task {}", self.id),
            ));
        }
        Ok(())
    }
}

/// Request for a new task; the queue assigns id and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_type: TaskType,
    pub payload: String,
    pub priority: Option<u8>,
    pub max_retries: Option<u32>,
    pub external_ref: Option<String>,
}

impl NewTask {
    /// Create a new task request.
    pub fn new(task_type: TaskType, payload: impl Into<String>) -> Self {
        Self {
            task_type,
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Set task priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set maximum retries.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    /// Attach an external reference (issue/PR identifier).
    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }
}

/// Check a task id: 1..=100 chars of `[A-Za-z0-9_-]`.
pub fn validate_id(id: &str) -> Result<(), QueueError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(QueueError::InvalidIdentifier(id.to_string()))
    }
}

/// Check a priority against the configured bounds.
pub fn validate_priority(priority: u8, bounds: &PriorityBounds) -> Result<u8, QueueError> {
    if (bounds.min..=bounds.max).contains(&priority) {
        Ok(priority)
    } else {
        Err(QueueError::InvalidPriority {
            value: priority,
            min: bounds.min,
            max: bounds.max,
        })
    }
}

/// Generate a task id of the form `task-<unix millis>-<8 hex>`, re-rolling
/// while `taken` reports a collision.
pub fn generate_id(taken: impl Fn(&str) -> bool) -> String {
    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("task-{}-{}", Utc::now().timestamp_millis(), &suffix[..8]);
        if !taken(&id) {
            return id;
        }
    }
}
