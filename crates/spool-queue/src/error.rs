//! Queue errors.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::task::TaskStatus;

/// Queue error types.
///
/// Every public operation returns one of these so callers can branch on the
/// failure kind instead of parsing messages.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A task field failed validation.
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Task id is empty, too long, or uses characters outside `[A-Za-z0-9_-]`.
    #[error("Invalid task identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Priority outside the configured bounds.
    #[error("Invalid priority {value}: must be within {min}..={max}")]
    InvalidPriority { value: u8, min: u8, max: u8 },

    /// A task with this id already exists.
    #[error("Duplicate task id: {0}")]
    DuplicateId(String),

    /// Task not found.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Queue is full.
    #[error("Queue is full (max {max} tasks)")]
    QueueFull { max: usize },

    /// Status change not allowed by the state machine.
    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A destructive operation was called without explicit confirmation.
    #[error("Confirmation required for {0}")]
    ConfirmationRequired(String),

    /// Could not obtain the queue lock in time.
    #[error("Timed out acquiring queue lock {path} after {waited:?}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Lock resource could not be created, read or removed.
    #[error("Lock error at {path}: {reason}")]
    Lock { path: PathBuf, reason: String },

    /// Queue document exists but cannot be parsed or fails validation.
    #[error("Queue document corrupted at {path}: {reason}")]
    JsonCorruption { path: PathBuf, reason: String },

    /// Reading or writing the queue document failed.
    #[error("Persistence error at {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// Backup is missing or unreadable.
    #[error("Invalid backup {id}: {reason}")]
    InvalidBackup { id: String, reason: String },

    /// Queue is disabled in configuration.
    #[error("Queue is disabled")]
    Disabled,

    /// A blocking document operation panicked or was cancelled.
    #[error("Background I/O task failed: {0}")]
    Background(String),
}

impl QueueError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        QueueError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        QueueError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn lock(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        QueueError::Lock {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Validation, not-found and state-machine failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::LockTimeout { .. } | QueueError::Lock { .. } | QueueError::Persistence { .. }
        )
    }
}
