//! In-memory task set rebuilt from the document for each locked operation.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use spool_config::QueueConfig;
use tracing::debug;

use crate::document::{DocumentMetadata, QueueDocument, SCHEMA_VERSION};
use crate::error::QueueError;
use crate::lifecycle::apply_transition;
use crate::task::{generate_id, NewTask, PriorityBounds, Task, TaskStatus, TaskType};

/// Queue order: higher priority first, then earlier creation time.
pub fn queue_order(a: &Task, b: &Task) -> Ordering {
    match b.priority.cmp(&a.priority) {
        Ordering::Equal => a.created_at.cmp(&b.created_at),
        other => other,
    }
}

/// Limits applied when tasks are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// 0 means unlimited.
    pub max_queue_size: usize,
    pub bounds: PriorityBounds,
    pub default_max_retries: u32,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            bounds: PriorityBounds::default(),
            default_max_retries: 3,
        }
    }
}

impl From<&QueueConfig> for StoreLimits {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            bounds: PriorityBounds::from(config),
            default_max_retries: config.max_retries,
        }
    }
}

/// Selects tasks by status and/or type. An empty filter matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
}

impl TaskFilter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            task_type: None,
        }
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self.task_type.is_none_or(|t| task.task_type == t)
    }
}

/// Task counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub total: usize,
}

impl StatusSummary {
    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Timeout => self.timeout,
        }
    }
}

/// The task set of one document, kept in queue order.
///
/// Holds no lock itself; the facade only mutates a store while holding the
/// queue lock and discards it afterwards.
#[derive(Debug, Clone)]
pub struct QueueStore {
    tasks: Vec<Task>,
    metadata: DocumentMetadata,
    limits: StoreLimits,
    dirty: bool,
}

impl QueueStore {
    pub fn from_document(document: QueueDocument, limits: StoreLimits) -> Self {
        let mut tasks = document.tasks;
        tasks.sort_by(queue_order);
        Self {
            tasks,
            metadata: document.metadata,
            limits,
            dirty: false,
        }
    }

    /// Snapshot of the current contents.
    pub fn to_document(&self) -> QueueDocument {
        QueueDocument {
            version: SCHEMA_VERSION,
            tasks: self.tasks.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Consume the store; bumps `metadata.updated_at` if anything changed.
    pub fn into_document(mut self) -> QueueDocument {
        if self.dirty {
            self.metadata.updated_at = Utc::now().max(self.metadata.created_at);
        }
        QueueDocument {
            version: SCHEMA_VERSION,
            tasks: self.tasks,
            metadata: self.metadata,
        }
    }

    /// Whether any mutation happened since the store was built.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Build a task from a request with a fresh, unused id and add it.
    pub fn create_task(&mut self, new: NewTask) -> Result<Task, QueueError> {
        self.ensure_capacity()?;
        let id = generate_id(|candidate| self.contains(candidate));
        let task = Task::from_new(id, new, &self.limits.bounds, self.limits.default_max_retries)?;
        self.add(task)
    }

    /// Insert a fully formed task at its queue position.
    ///
    /// New tasks start `pending` with no retries consumed; any other status
    /// is only reachable through a transition.
    pub fn add(&mut self, task: Task) -> Result<Task, QueueError> {
        task.validate(&self.limits.bounds)?;
        if task.status != TaskStatus::Pending || task.retry_count != 0 {
            return Err(QueueError::validation(
                "status",
                format!(
                    "new task {} must be pending with no retries (got {}, retry_count {})",
                    task.id, task.status, task.retry_count
                ),
            ));
        }
        if self.contains(&task.id) {
            return Err(QueueError::DuplicateId(task.id));
        }
        self.ensure_capacity()?;

        let index = self
            .tasks
            .partition_point(|t| queue_order(t, &task) != Ordering::Greater);
        debug!("Adding task {} (priority {}) at position {}", task.id, task.priority, index);
        self.tasks.insert(index, task.clone());
        self.dirty = true;
        Ok(task)
    }

    /// Remove a task in any status.
    pub fn remove(&mut self, id: &str) -> Result<Task, QueueError> {
        let index = self.index_of(id)?;
        self.dirty = true;
        Ok(self.tasks.remove(index))
    }

    /// Claim the next pending task, moving it to `in_progress`.
    pub fn get_next(&mut self, now: DateTime<Utc>) -> Result<Option<Task>, QueueError> {
        let Some(task) = self.tasks.iter_mut().find(|t| t.status.is_claimable()) else {
            return Ok(None);
        };
        apply_transition(task, TaskStatus::InProgress, now)?;
        self.dirty = true;
        Ok(Some(task.clone()))
    }

    /// Request a status change, optionally recording a failure reason.
    pub fn transition(
        &mut self,
        id: &str,
        requested: TaskStatus,
        last_error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Task, QueueError> {
        let index = self.index_of(id)?;
        let task = &mut self.tasks[index];
        let previous = task.status;
        let reached = apply_transition(task, requested, now)?;
        if let Some(error) = last_error {
            task.last_error = Some(error);
        }
        debug!("Task {}: {} -> {} (requested {})", id, previous, reached, requested);
        self.dirty = true;
        Ok(task.clone())
    }

    pub fn update_status(&mut self, id: &str, status: TaskStatus) -> Result<Task, QueueError> {
        self.transition(id, status, None, Utc::now())
    }

    /// Tasks matching `filter`, in queue order.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        self.tasks.iter().filter(|t| filter.matches(t)).cloned().collect()
    }

    /// Remove every task. Returns how many were removed.
    pub fn clear(&mut self, confirm: bool) -> Result<usize, QueueError> {
        if !confirm {
            return Err(QueueError::ConfirmationRequired("clear".to_string()));
        }
        let removed = self.tasks.len();
        self.tasks.clear();
        self.dirty = true;
        Ok(removed)
    }

    pub fn status_summary(&self) -> StatusSummary {
        let mut summary = StatusSummary {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Timeout => summary.timeout += 1,
            }
        }
        summary
    }

    fn index_of(&self, id: &str) -> Result<usize, QueueError> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    fn ensure_capacity(&self) -> Result<(), QueueError> {
        let max = self.limits.max_queue_size;
        if max > 0 && self.tasks.len() >= max {
            return Err(QueueError::QueueFull { max });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
