//! # Spool Queue
//!
//! Persistent task queue shared by independent processes on one host.
//!
//! ## Features
//!
//! - Priority ordering, FIFO within a priority
//! - Task state machine with bounded retries
//! - Atomic whole-document persistence (`queue.json`)
//! - Cross-process locking (`flock`, or a PID file where `flock` is unavailable)
//! - Timestamped backups, restore, and recovery from a corrupt document

pub mod document;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod persistence;
pub mod queue;
pub mod store;
pub mod task;

pub use document::{LoadedDocument, QueueDocument, Reliability};
pub use error::QueueError;
pub use lock::{LockGuard, LockManager, LockStrategy};
pub use persistence::{BackupInfo, PersistenceEngine};
pub use queue::TaskQueue;
pub use store::{QueueStore, StatusSummary, StoreLimits, TaskFilter};
pub use task::{NewTask, PriorityBounds, Task, TaskStatus, TaskType};
