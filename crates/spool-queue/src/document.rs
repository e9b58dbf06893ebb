//! On-disk queue document.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Schema version written by this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// Document timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Complete snapshot of the queue: every task plus metadata.
///
/// There is no delta format; each save replaces the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDocument {
    pub version: u32,
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub metadata: DocumentMetadata,
}

impl QueueDocument {
    /// Empty document stamped with the current time.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            version: SCHEMA_VERSION,
            tasks: Vec::new(),
            metadata: DocumentMetadata {
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Check schema version, per-task structure and id uniqueness.
    ///
    /// Priorities are not checked against the configured bounds: tasks added
    /// under a wider range stay readable after the range is narrowed.
    ///
    /// Returns a human readable reason on failure; callers wrap it in the
    /// error kind that fits (corruption for the live file, invalid backup for
    /// a restore source).
    pub fn check(&self) -> Result<(), String> {
        if self.version == 0 || self.version > SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema version {} (supported: {})",
                self.version, SCHEMA_VERSION
            ));
        }

        let mut seen = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(format!("duplicate task id {}", task.id));
            }
            task.check_structure().map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// How trustworthy a loaded document is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reliability {
    /// Read straight from the live document.
    Reliable,
    /// Live document was corrupt; contents come from this backup.
    Recovered { backup_id: String },
    /// Live document was corrupt and no valid backup exists; contents are empty.
    Unreliable { reason: String },
}

impl Reliability {
    pub fn is_reliable(&self) -> bool {
        matches!(self, Reliability::Reliable)
    }
}

/// A document together with its reliability flag.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: QueueDocument,
    pub reliability: Reliability,
}
