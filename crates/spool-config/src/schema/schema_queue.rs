//! Queue behaviour configuration (capacity, priorities, retries, retention).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::default_true;

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Whether the queue accepts operations at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of tasks held in the queue document (0 = unlimited).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Priority assigned when a caller does not pick one.
    #[serde(default = "default_priority")]
    pub default_priority: u8,

    /// Lowest accepted priority (least urgent).
    #[serde(default = "default_min_priority")]
    pub min_priority: u8,

    /// Highest accepted priority (most urgent).
    #[serde(default = "default_max_priority")]
    pub max_priority: u8,

    /// Maximum retries for failed or timed out tasks.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long finished tasks are kept before cleanup removes them.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_max_queue_size() -> usize {
    100
}

fn default_priority() -> u8 {
    5
}

fn default_min_priority() -> u8 {
    1
}

fn default_max_priority() -> u8 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retention_days() -> u32 {
    7
}

impl QueueConfig {
    /// Retention window as a duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_queue_size: default_max_queue_size(),
            default_priority: default_priority(),
            min_priority: default_min_priority(),
            max_priority: default_max_priority(),
            max_retries: default_max_retries(),
            retention_days: default_retention_days(),
        }
    }
}
