//! Storage and locking configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where the queue document and its backups live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `queue.json`, the lock file and `backups/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of backups kept before the oldest are pruned.
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".spool"))
        .unwrap_or_else(|| PathBuf::from("/tmp/spool"))
}

fn default_backup_retention() -> usize {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_retention: default_backup_retention(),
        }
    }
}

/// Which cross-process lock mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockStrategyKind {
    /// Probe for OS advisory locks and fall back to a PID file.
    #[default]
    Auto,
    /// OS advisory lock (`flock`).
    Flock,
    /// PID file created with an exclusive create.
    PidFile,
}

/// Lock acquisition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Give up acquiring the queue lock after this many seconds.
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,

    /// Locking mechanism.
    #[serde(default)]
    pub strategy: LockStrategyKind,
}

fn default_lock_timeout() -> u64 {
    30
}

impl LockConfig {
    /// Lock timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout(),
            strategy: LockStrategyKind::default(),
        }
    }
}
