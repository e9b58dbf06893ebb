//! Configuration schema definitions.

use serde::{Deserialize, Serialize};

mod schema_queue;
mod schema_storage;

pub use schema_queue::*;
pub use schema_storage::*;

/// Shared default helper used by submodules.
pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub lock: LockConfig,
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
