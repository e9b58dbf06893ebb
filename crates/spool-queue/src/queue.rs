//! Public queue API.
//!
//! Every mutation runs as: acquire the queue lock, load the document
//! (recovering from a backup if it is corrupt), apply the change to a fresh
//! [`QueueStore`], save atomically, release. Reads skip the lock and return a
//! best-effort snapshot.
//!
//! Document I/O is synchronous `std::fs` work and always runs on the blocking
//! pool, never on a runtime worker thread.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use spool_config::Config;
use tracing::{debug, info, warn};

use crate::document::Reliability;
use crate::error::QueueError;
use crate::lifecycle::{cleanup_old_tasks, load_or_recover};
use crate::lock::LockManager;
use crate::persistence::{validate_backup_id, BackupInfo, PersistenceEngine};
use crate::store::{QueueStore, StatusSummary, StoreLimits, TaskFilter};
use crate::task::{validate_id, validate_priority, NewTask, Task, TaskStatus, TaskType};

/// Persistent, multi-process task queue rooted at one data directory.
///
/// Cheap to clone; clones share nothing but the directory, so each clone is
/// as independent as a separate process.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    enabled: bool,
    limits: StoreLimits,
    retention: Duration,
    persistence: PersistenceEngine,
    lock: LockManager,
}

impl TaskQueue {
    /// Open the queue described by `config`, creating the data directory and
    /// picking a lock strategy.
    pub fn init(config: &Config) -> Result<Self, QueueError> {
        let limits = StoreLimits::from(&config.queue);
        let bounds = limits.bounds;
        if bounds.min > bounds.max {
            return Err(QueueError::validation(
                "queue.min_priority",
                format!("min_priority {} exceeds max_priority {}", bounds.min, bounds.max),
            ));
        }
        validate_priority(bounds.default, &bounds)?;

        let data_dir = &config.storage.data_dir;
        let lock = LockManager::probe(data_dir, config.lock.strategy, config.lock.timeout())?;
        let persistence = PersistenceEngine::new(data_dir, config.storage.backup_retention);

        info!(
            "Task queue at {} (lock: {}, max size: {}, enabled: {})",
            data_dir.display(),
            lock.strategy_name(),
            limits.max_queue_size,
            config.queue.enabled
        );

        Ok(Self {
            enabled: config.queue.enabled,
            limits,
            retention: config.queue.retention(),
            persistence,
            lock,
        })
    }

    /// Replace the lock manager, e.g. to tune timeout or backoff.
    pub fn with_lock_manager(mut self, lock: LockManager) -> Self {
        self.lock = lock;
        self
    }

    pub fn data_dir(&self) -> &Path {
        self.persistence.data_dir()
    }

    pub fn lock_strategy(&self) -> &'static str {
        self.lock.strategy_name()
    }

    /// Configured retention for [`TaskQueue::cleanup`].
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Add a task built from type, payload and optional priority.
    pub async fn add(
        &self,
        task_type: TaskType,
        payload: impl Into<String>,
        priority: Option<u8>,
    ) -> Result<Task, QueueError> {
        let mut new = NewTask::new(task_type, payload);
        new.priority = priority;
        self.submit(new).await
    }

    /// Add a task from a full request.
    pub async fn submit(&self, new: NewTask) -> Result<Task, QueueError> {
        let task = self.mutate(false, move |store, _| store.create_task(new)).await?;
        info!(
            "Added task {} ({}, priority {})",
            task.id, task.task_type, task.priority
        );
        Ok(task)
    }

    /// Add a task whose id the caller chose. It must be `pending` with no
    /// retries consumed.
    pub async fn enqueue(&self, task: Task) -> Result<Task, QueueError> {
        let task = self.mutate(false, move |store, _| store.add(task)).await?;
        debug!("Enqueued task {}", task.id);
        Ok(task)
    }

    /// Remove a task regardless of status.
    pub async fn remove(&self, id: &str) -> Result<Task, QueueError> {
        validate_id(id)?;
        let id = id.to_string();
        let task = self.mutate(false, move |store, _| store.remove(&id)).await?;
        info!("Removed task {} ({})", task.id, task.status);
        Ok(task)
    }

    /// Claim the most urgent pending task.
    pub async fn get_next(&self) -> Result<Option<Task>, QueueError> {
        let claimed = self
            .mutate(false, |store, _| store.get_next(Utc::now()))
            .await?;
        match &claimed {
            Some(task) => info!("Claimed task {} (priority {})", task.id, task.priority),
            None => debug!("No pending task to claim"),
        }
        Ok(claimed)
    }

    /// Request a status change; retries are applied by the state machine.
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task, QueueError> {
        self.transition(id, status, None).await
    }

    /// Report a failure; the task is retried while retries remain.
    pub async fn fail(&self, id: &str, error: impl Into<String>) -> Result<Task, QueueError> {
        self.transition(id, TaskStatus::Failed, Some(error.into())).await
    }

    /// Report a timeout; the task is retried while retries remain.
    pub async fn timeout(&self, id: &str, error: impl Into<String>) -> Result<Task, QueueError> {
        self.transition(id, TaskStatus::Timeout, Some(error.into())).await
    }

    async fn transition(
        &self,
        id: &str,
        status: TaskStatus,
        last_error: Option<String>,
    ) -> Result<Task, QueueError> {
        validate_id(id)?;
        let id = id.to_string();
        let task = self
            .mutate(false, move |store, _| {
                store.transition(&id, status, last_error, Utc::now())
            })
            .await?;
        if task.status == status {
            info!("Task {} is now {}", task.id, task.status);
        } else {
            warn!(
                "Task {} requeued after {} (retry {}/{})",
                task.id, status, task.retry_count, task.max_retries
            );
        }
        Ok(task)
    }

    /// Tasks matching `filter`, in queue order.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, QueueError> {
        Ok(self.snapshot().await?.list(filter))
    }

    pub async fn get(&self, id: &str) -> Result<Task, QueueError> {
        validate_id(id)?;
        self.snapshot()
            .await?
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    pub async fn size(&self) -> Result<usize, QueueError> {
        Ok(self.snapshot().await?.size())
    }

    pub async fn status_summary(&self) -> Result<StatusSummary, QueueError> {
        Ok(self.snapshot().await?.status_summary())
    }

    /// How trustworthy the live document currently is.
    pub async fn reliability(&self) -> Result<Reliability, QueueError> {
        self.ensure_enabled()?;
        let persistence = self.persistence.clone();
        run_blocking(move || Ok(load_or_recover(&persistence)?.reliability)).await
    }

    /// Remove terminal tasks not updated within `retention`.
    pub async fn cleanup(&self, retention: Duration) -> Result<usize, QueueError> {
        self.mutate(false, move |store, engine| {
            cleanup_old_tasks(store, engine, retention, Utc::now())
        })
        .await
    }

    /// Remove every task after backing the queue up.
    ///
    /// Also the way out of a corrupt queue with no usable backup: the bad
    /// document is quarantined and replaced by an empty one.
    pub async fn clear(&self, confirm: bool) -> Result<BackupInfo, QueueError> {
        if !confirm {
            return Err(QueueError::ConfirmationRequired("clear".to_string()));
        }
        let (backup, removed) = self
            .mutate(true, |store, engine| {
                let backup = engine.backup(&store.to_document(), "clear")?;
                let removed = store.clear(true)?;
                Ok((backup, removed))
            })
            .await?;
        info!("Cleared {} task(s), backup {}", removed, backup.id);
        Ok(backup)
    }

    /// Take a backup of the current queue.
    pub async fn backup(&self) -> Result<BackupInfo, QueueError> {
        self.mutate(false, |store, engine| engine.backup(&store.to_document(), "manual"))
            .await
    }

    /// All backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>, QueueError> {
        self.ensure_enabled()?;
        let persistence = self.persistence.clone();
        run_blocking(move || persistence.list_backups()).await
    }

    /// Replace the queue with a backup.
    pub async fn restore(&self, backup_id: &str) -> Result<(), QueueError> {
        self.ensure_enabled()?;
        validate_backup_id(backup_id)?;
        let persistence = self.persistence.clone();
        let backup_id = backup_id.to_string();
        self.lock
            .with_lock(move || run_blocking(move || persistence.restore(&backup_id).map(|_| ())))
            .await
    }

    fn ensure_enabled(&self) -> Result<(), QueueError> {
        if self.enabled {
            Ok(())
        } else {
            Err(QueueError::Disabled)
        }
    }

    async fn snapshot(&self) -> Result<QueueStore, QueueError> {
        self.ensure_enabled()?;
        let persistence = self.persistence.clone();
        let limits = self.limits;
        run_blocking(move || {
            let loaded = load_or_recover(&persistence)?;
            Ok(QueueStore::from_document(loaded.document, limits))
        })
        .await
    }

    /// Run `op` on a freshly loaded store under the queue lock and save the
    /// result if it changed anything.
    ///
    /// An `Unreliable` document is only writable when `allow_unreliable` is
    /// set; a corrupt live file is quarantined before it is overwritten.
    async fn mutate<T, F>(&self, allow_unreliable: bool, op: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut QueueStore, &PersistenceEngine) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_enabled()?;
        let persistence = self.persistence.clone();
        let limits = self.limits;
        self.lock
            .with_lock(move || {
                run_blocking(move || {
                    let loaded = load_or_recover(&persistence)?;
                    if let Reliability::Unreliable { reason } = &loaded.reliability {
                        if !allow_unreliable {
                            return Err(QueueError::JsonCorruption {
                                path: persistence.queue_path(),
                                reason: reason.clone(),
                            });
                        }
                    }

                    let mut store = QueueStore::from_document(loaded.document, limits);
                    let value = op(&mut store, &persistence)?;

                    if store.is_dirty() {
                        if !loaded.reliability.is_reliable() {
                            persistence.quarantine_corrupt()?;
                        }
                        persistence.save(&store.into_document())?;
                    }
                    Ok(value)
                })
            })
            .await
    }
}

// Helper to run document I/O on the blocking pool
async fn run_blocking<F, T>(f: F) -> Result<T, QueueError>
where
    F: FnOnce() -> Result<T, QueueError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QueueError::Background(e.to_string()))?
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
