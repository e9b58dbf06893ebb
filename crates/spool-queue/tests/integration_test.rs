//! End-to-end tests for the queue across independent handles.
//!
//! Every handle opens its own lock resource, so handles in one test process
//! contend exactly like separate processes do.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::Utc;
use spool_config::{Config, LockStrategyKind};
use spool_queue::lock::{LockRecord, PID_FILE};
use spool_queue::{
    NewTask, PriorityBounds, QueueError, Reliability, Task, TaskFilter, TaskQueue, TaskStatus,
    TaskType,
};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn config(dir: &Path, strategy: LockStrategyKind) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.to_path_buf();
    config.queue.max_queue_size = 0;
    config.lock.timeout_secs = 20;
    config.lock.strategy = strategy;
    config
}

fn open(dir: &Path, strategy: LockStrategyKind) -> TaskQueue {
    TaskQueue::init(&config(dir, strategy)).unwrap()
}

fn task_with_id(id: &str) -> Task {
    Task::from_new(
        id.to_string(),
        NewTask::new(TaskType::Generic, id),
        &PriorityBounds::default(),
        3,
    )
    .unwrap()
}

/// PID of a child that has already exited and been reaped.
fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

async fn concurrent_writers(strategy: LockStrategyKind) {
    const WRITERS: usize = 4;
    const TASKS_PER_WRITER: usize = 10;

    let dir = TempDir::new().unwrap();
    let mut handles = Vec::new();
    for writer in 0..WRITERS {
        let queue = open(dir.path(), strategy);
        handles.push(tokio::spawn(async move {
            for n in 0..TASKS_PER_WRITER {
                queue
                    .enqueue(task_with_id(&format!("w{}-t{}", writer, n)))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let queue = open(dir.path(), strategy);
    let tasks = queue.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), WRITERS * TASKS_PER_WRITER);
    let unique: HashSet<_> = tasks.iter().map(|t| t.id.clone()).collect();
    assert_eq!(unique.len(), WRITERS * TASKS_PER_WRITER);
}

// ============================================================================
// Concurrency
// ============================================================================

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_flock() {
    concurrent_writers(LockStrategyKind::Flock).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_pid_file() {
    concurrent_writers(LockStrategyKind::PidFile).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_exclusive() {
    let dir = TempDir::new().unwrap();
    let seed = open(dir.path(), LockStrategyKind::Auto);
    for i in 0..20 {
        seed.add(TaskType::Generic, format!("job {}", i), None).await.unwrap();
    }

    let mut workers = Vec::new();
    for _ in 0..4 {
        let queue = open(dir.path(), LockStrategyKind::Auto);
        workers.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(task) = queue.get_next().await.unwrap() {
                claimed.push(task.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
    assert_eq!(seed.status_summary().await.unwrap().in_progress, 20);
}

// ============================================================================
// Stale locks
// ============================================================================

#[tokio::test]
async fn test_stale_pid_lock_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let stale = LockRecord {
        pid: dead_pid(),
        token: "crashed-holder".to_string(),
        acquired_at: Utc::now(),
    };
    fs::write(dir.path().join(PID_FILE), serde_json::to_vec(&stale).unwrap()).unwrap();

    let queue = open(dir.path(), LockStrategyKind::PidFile);
    let task = queue.add(TaskType::Generic, "after crash", None).await.unwrap();

    assert_eq!(queue.get(&task.id).await.unwrap().payload, "after crash");
    assert!(!dir.path().join(PID_FILE).exists());
}

#[tokio::test]
async fn test_live_pid_lock_times_out() {
    let dir = TempDir::new().unwrap();
    let live = LockRecord::current();
    fs::write(dir.path().join(PID_FILE), serde_json::to_vec(&live).unwrap()).unwrap();

    let mut config = config(dir.path(), LockStrategyKind::PidFile);
    config.lock.timeout_secs = 1;
    let queue = TaskQueue::init(&config).unwrap();

    let err = queue.add(TaskType::Generic, "blocked", None).await.unwrap_err();
    assert!(matches!(err, QueueError::LockTimeout { .. }));
    assert!(err.is_retryable());
    assert!(!dir.path().join("queue.json").exists());
}

// ============================================================================
// Corruption and recovery
// ============================================================================

#[tokio::test]
async fn test_recovery_from_backup_after_corruption() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), LockStrategyKind::Auto);
    let task = queue.add(TaskType::Custom, "precious", Some(9)).await.unwrap();
    queue.backup().await.unwrap();

    // Torn write from some external tool.
    fs::write(dir.path().join("queue.json"), &b"{\"version\":1,\"tasks\":[{\"id\""[..]).unwrap();

    let reopened = open(dir.path(), LockStrategyKind::Auto);
    assert!(matches!(
        reopened.reliability().await.unwrap(),
        Reliability::Recovered { .. }
    ));
    let claimed = reopened.get_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);
    assert!(reopened.reliability().await.unwrap().is_reliable());
}

#[tokio::test]
async fn test_restore_rolls_back() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), LockStrategyKind::Auto);
    queue.add(TaskType::Generic, "one", None).await.unwrap();
    let snapshot = queue.backup().await.unwrap();
    queue.add(TaskType::Generic, "two", None).await.unwrap();

    queue.restore(&snapshot.id).await.unwrap();
    let tasks = queue.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].payload, "one");
}

// ============================================================================
// Lifecycle scenarios
// ============================================================================

#[tokio::test]
async fn test_failed_task_is_never_claimed_again() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), LockStrategyKind::Auto);
    let task = queue.add(TaskType::Generic, "flaky", None).await.unwrap();

    for _ in 0..=task.max_retries {
        let claimed = queue.get_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        queue.update_status(&task.id, TaskStatus::Failed).await.unwrap();
    }

    let failed = queue.get(&task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retry_count, failed.max_retries);
    assert!(queue.get_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_cleanup_keeps_live_tasks() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), LockStrategyKind::Auto);
    let done = queue.add(TaskType::Generic, "done", Some(9)).await.unwrap();
    queue.add(TaskType::Generic, "waiting", Some(1)).await.unwrap();
    queue.get_next().await.unwrap();
    queue.update_status(&done.id, TaskStatus::Completed).await.unwrap();

    // Nothing is old enough under the configured retention.
    assert_eq!(queue.cleanup(queue.retention()).await.unwrap(), 0);
    assert!(queue.list_backups().await.unwrap().is_empty());

    assert_eq!(queue.cleanup(std::time::Duration::ZERO).await.unwrap(), 1);
    let left = queue.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].status, TaskStatus::Pending);
    assert_eq!(queue.list_backups().await.unwrap().len(), 1);
}
