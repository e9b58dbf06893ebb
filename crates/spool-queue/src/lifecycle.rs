//! Task state machine, retention cleanup, and recovery from a corrupt document.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::document::{LoadedDocument, QueueDocument, Reliability};
use crate::error::QueueError;
use crate::persistence::PersistenceEngine;
use crate::store::QueueStore;
use crate::task::{Task, TaskStatus};

/// Apply a requested status change to `task`, enforcing the state machine.
///
/// ```text
/// pending     -> in_progress
/// in_progress -> completed
/// in_progress -> pending            requested failed|timeout|pending, retries left (retry_count += 1)
/// in_progress -> failed | timeout   retries exhausted
/// ```
///
/// Returns the status the task ended up in, which differs from `requested`
/// when a retry sends it back to `pending`. On error the task is untouched.
pub fn apply_transition(
    task: &mut Task,
    requested: TaskStatus,
    now: DateTime<Utc>,
) -> Result<TaskStatus, QueueError> {
    use TaskStatus::*;

    let next = match (task.status, requested) {
        (Pending, InProgress) => InProgress,
        (InProgress, Completed) => Completed,
        (InProgress, Failed | Timeout | Pending) if task.can_retry() => Pending,
        (InProgress, Failed) => Failed,
        (InProgress, Timeout) => Timeout,
        (from, to) => {
            return Err(QueueError::InvalidTransition {
                id: task.id.clone(),
                from,
                to,
            });
        }
    };

    if next == Pending {
        task.retry_count += 1;
    }
    if next == Completed {
        task.last_error = None;
    }
    task.status = next;
    task.touch(now);
    Ok(next)
}

/// Ids of terminal tasks last updated at or before `now - retention`.
pub fn expired_task_ids(
    tasks: &[Task],
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<String>, QueueError> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| QueueError::validation("retention", e.to_string()))?;
    let cutoff = now - retention;

    Ok(tasks
        .iter()
        .filter(|t| t.status.is_terminal() && t.updated_at <= cutoff)
        .map(|t| t.id.clone())
        .collect())
}

/// Remove expired terminal tasks from `store`, backing the queue up first.
///
/// No backup is taken when nothing qualifies. Returns the number removed.
pub fn cleanup_old_tasks(
    store: &mut QueueStore,
    engine: &PersistenceEngine,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<usize, QueueError> {
    let expired = expired_task_ids(store.tasks(), retention, now)?;
    if expired.is_empty() {
        return Ok(0);
    }

    engine.backup(&store.to_document(), "cleanup")?;
    for id in &expired {
        store.remove(id)?;
    }
    info!(
        "Cleaned up {} terminal task(s) older than {:?}",
        expired.len(),
        retention
    );
    Ok(expired.len())
}

/// Load the live document, falling back to the newest valid backup.
pub fn load_or_recover(engine: &PersistenceEngine) -> Result<LoadedDocument, QueueError> {
    let reason = match engine.load() {
        Ok(document) => {
            return Ok(LoadedDocument {
                document,
                reliability: Reliability::Reliable,
            });
        }
        Err(QueueError::JsonCorruption { path, reason }) => {
            error!("Queue document corrupted at {}: {}", path.display(), reason);
            reason
        }
        Err(e) => return Err(e),
    };

    match engine.latest_valid_backup()? {
        Some((info, document)) => {
            warn!(
                "Recovered {} task(s) from backup {}",
                document.tasks.len(),
                info.id
            );
            Ok(LoadedDocument {
                document,
                reliability: Reliability::Recovered { backup_id: info.id },
            })
        }
        None => {
            error!("No valid backup to recover from; queue contents unreliable");
            Ok(LoadedDocument {
                document: QueueDocument::empty(),
                reliability: Reliability::Unreliable { reason },
            })
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
