//! Durable storage of the queue document and its backups.
//!
//! Layout under the data directory:
//! ```text
//! {data_dir}/
//! ├── queue.json
//! └── backups/
//!     ├── {backup_id}.json
//!     └── corrupt-{timestamp}.json.corrupt
//! ```
//!
//! Every write goes to a temp file in the target's directory, is synced, and
//! is renamed over the target, so readers see either the old or the new
//! document and never a partial one.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::QueueDocument;
use crate::error::QueueError;

/// Live document file name.
pub const QUEUE_FILE: &str = "queue.json";
/// Backup directory name.
pub const BACKUP_DIR: &str = "backups";

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";
const BACKUP_TIMESTAMP_LEN: usize = 19;
const BACKUP_SUFFIX_LEN: usize = 8;
const MAX_BACKUP_ID_LEN: usize = 100;

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(20);
/// Temp files older than this were left by a writer that died mid-write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60);

/// A backup as listed on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    /// `None` when the backup no longer parses or validates.
    pub task_count: Option<usize>,
}

impl BackupInfo {
    pub fn is_valid(&self) -> bool {
        self.task_count.is_some()
    }
}

/// Reads and writes the queue document. Callers hold the queue lock.
#[derive(Debug, Clone)]
pub struct PersistenceEngine {
    data_dir: PathBuf,
    backup_retention: usize,
}

impl PersistenceEngine {
    /// Create an engine rooted at `data_dir`.
    ///
    /// `backup_retention` is clamped to at least one so the backup just taken
    /// always survives pruning.
    pub fn new(data_dir: impl Into<PathBuf>, backup_retention: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            backup_retention: backup_retention.max(1),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(QUEUE_FILE)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join(BACKUP_DIR)
    }

    /// Load the live document. A missing file is an empty queue.
    pub fn load(&self) -> Result<QueueDocument, QueueError> {
        let path = self.queue_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No queue document at {}, starting empty", path.display());
                return Ok(QueueDocument::empty());
            }
            Err(e) => return Err(QueueError::persistence(&path, e)),
        };

        self.parse(&content)
            .map_err(|reason| QueueError::JsonCorruption { path, reason })
    }

    /// Atomically replace the live document.
    ///
    /// Also sweeps temp files abandoned by crashed writers, which is safe
    /// because callers hold the queue lock.
    pub fn save(&self, document: &QueueDocument) -> Result<(), QueueError> {
        sweep_stale_temp_files(&self.data_dir, STALE_TEMP_AGE);
        sweep_stale_temp_files(&self.backups_dir(), STALE_TEMP_AGE);
        let path = self.queue_path();
        let content = serde_json::to_vec_pretty(document).map_err(|e| QueueError::persistence(&path, e))?;
        write_atomic(&path, &content)?;
        debug!("Saved {} task(s) to {}", document.tasks.len(), path.display());
        Ok(())
    }

    /// Write `document` as a new backup, then prune old ones.
    pub fn backup(&self, document: &QueueDocument, reason: &str) -> Result<BackupInfo, QueueError> {
        let created_at = Utc::now();
        let reason = sanitize_reason(reason);
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!(
            "{}-{}-{}",
            created_at.format(BACKUP_TIMESTAMP_FORMAT),
            reason,
            &suffix[..BACKUP_SUFFIX_LEN]
        );
        let path = self.backups_dir().join(format!("{}.json", id));

        let content = serde_json::to_vec_pretty(document).map_err(|e| QueueError::persistence(&path, e))?;
        write_atomic(&path, &content)?;
        info!(
            "Created backup {} ({} task(s))",
            id,
            document.tasks.len()
        );

        self.prune_backups()?;

        Ok(BackupInfo {
            id,
            reason,
            created_at,
            path,
            task_count: Some(document.tasks.len()),
        })
    }

    /// All backups, newest first. Unreadable ones are listed as invalid.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, QueueError> {
        let mut backups: Vec<BackupInfo> = self
            .backup_entries()?
            .into_iter()
            .map(|(id, path)| {
                let task_count = self.read_backup(&path).ok().map(|doc| doc.tasks.len());
                let (created_at, reason) = parse_backup_id(&id).unwrap_or_default();
                BackupInfo {
                    id,
                    reason,
                    created_at,
                    path,
                    task_count,
                }
            })
            .collect();
        backups.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(backups)
    }

    /// Newest backup that parses and validates.
    pub fn latest_valid_backup(&self) -> Result<Option<(BackupInfo, QueueDocument)>, QueueError> {
        let mut entries = self.backup_entries()?;
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        for (id, path) in entries {
            match self.read_backup(&path) {
                Ok(document) => {
                    let (created_at, reason) = parse_backup_id(&id).unwrap_or_default();
                    let info = BackupInfo {
                        id,
                        reason,
                        created_at,
                        path,
                        task_count: Some(document.tasks.len()),
                    };
                    return Ok(Some((info, document)));
                }
                Err(reason) => warn!("Skipping unusable backup {}: {}", id, reason),
            }
        }
        Ok(None)
    }

    /// Load a backup by id.
    pub fn load_backup(&self, backup_id: &str) -> Result<QueueDocument, QueueError> {
        validate_backup_id(backup_id)?;
        let path = self.backups_dir().join(format!("{}.json", backup_id));
        self.read_backup(&path).map_err(|reason| QueueError::InvalidBackup {
            id: backup_id.to_string(),
            reason,
        })
    }

    /// Replace the live document with a backup.
    ///
    /// When the live document is readable it is first saved as a
    /// `pre-restore` backup. Returns the document now live.
    pub fn restore(&self, backup_id: &str) -> Result<QueueDocument, QueueError> {
        let mut restored = self.load_backup(backup_id)?;

        match self.load() {
            Ok(current) => {
                self.backup(&current, "pre-restore")?;
            }
            Err(QueueError::JsonCorruption { reason, .. }) => {
                warn!("Live queue document unreadable, skipping pre-restore backup: {}", reason);
                self.quarantine_corrupt()?;
            }
            Err(e) => return Err(e),
        }

        restored.metadata.updated_at = Utc::now().max(restored.metadata.created_at);
        self.save(&restored)?;
        info!(
            "Restored backup {} ({} task(s))",
            backup_id,
            restored.tasks.len()
        );
        Ok(restored)
    }

    /// Copy the live document aside before it is overwritten.
    ///
    /// Returns the quarantine path, or `None` when there is no live file.
    pub fn quarantine_corrupt(&self) -> Result<Option<PathBuf>, QueueError> {
        let source = self.queue_path();
        let bytes = match fs::read(&source) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(QueueError::persistence(&source, e)),
        };

        let name = format!(
            "corrupt-{}-{}.json.corrupt",
            Utc::now().format(BACKUP_TIMESTAMP_FORMAT),
            &Uuid::new_v4().simple().to_string()[..BACKUP_SUFFIX_LEN]
        );
        let target = self.backups_dir().join(name);
        write_atomic(&target, &bytes)?;
        warn!(
            "Quarantined corrupt queue document {} to {}",
            source.display(),
            target.display()
        );
        Ok(Some(target))
    }

    fn parse(&self, content: &str) -> Result<QueueDocument, String> {
        let document: QueueDocument = serde_json::from_str(content).map_err(|e| e.to_string())?;
        document.check()?;
        Ok(document)
    }

    fn read_backup(&self, path: &Path) -> Result<QueueDocument, String> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err("backup not found".to_string()),
            Err(e) => return Err(e.to_string()),
        };
        self.parse(&content)
    }

    /// `(id, path)` of every file that looks like a backup.
    fn backup_entries(&self) -> Result<Vec<(String, PathBuf)>, QueueError> {
        let dir = self.backups_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(QueueError::persistence(&dir, e)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| QueueError::persistence(&dir, e))?;
            let path = entry.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if parse_backup_id(id).is_some() {
                found.push((id.to_string(), path));
            }
        }
        Ok(found)
    }

    fn prune_backups(&self) -> Result<(), QueueError> {
        let mut entries = self.backup_entries()?;
        if entries.len() <= self.backup_retention {
            return Ok(());
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        for (id, path) in entries.into_iter().skip(self.backup_retention) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Pruned backup {}", id),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to prune backup {}: {}", id, e),
            }
        }
        Ok(())
    }
}

/// Check that `id` is a well-formed backup id before it touches a path.
pub fn validate_backup_id(id: &str) -> Result<(), QueueError> {
    let well_formed = id.len() <= MAX_BACKUP_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && parse_backup_id(id).is_some();
    if well_formed {
        Ok(())
    } else {
        Err(QueueError::InvalidBackup {
            id: id.to_string(),
            reason: "malformed backup id".to_string(),
        })
    }
}

/// Split `<timestamp>-<reason>-<8 hex>` into its timestamp and reason.
fn parse_backup_id(id: &str) -> Option<(DateTime<Utc>, String)> {
    let stamp = id.get(..BACKUP_TIMESTAMP_LEN)?;
    let rest = id.get(BACKUP_TIMESTAMP_LEN..)?.strip_prefix('-')?;
    let split = rest.len().checked_sub(BACKUP_SUFFIX_LEN + 1)?;
    let (reason, suffix) = rest.split_at(split);
    let suffix = suffix.strip_prefix('-')?;

    if reason.is_empty() || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let created_at = NaiveDateTime::parse_from_str(stamp, BACKUP_TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    Some((created_at, reason.to_string()))
}

fn sanitize_reason(reason: &str) -> String {
    let cleaned: String = reason
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(32)
        .collect();
    if cleaned.is_empty() {
        "manual".to_string()
    } else {
        cleaned
    }
}

/// Remove `.<name>.tmp-*` files in `dir` last modified more than `max_age` ago.
///
/// Returns how many were removed. Failures are logged, never returned.
fn sweep_stale_temp_files(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with('.') && name.contains(".tmp-")) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if !age.is_some_and(|age| age >= max_age) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                removed += 1;
                warn!("Removed abandoned temp file {}", entry.path().display());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temp file {}: {}", entry.path().display(), e),
        }
    }
    removed
}

/// Write `content` to `target` via a synced temp file and a rename.
///
/// Temp file creation and writing are retried; the temp file never outlives
/// a failed attempt.
fn write_atomic(target: &Path, content: &[u8]) -> Result<(), QueueError> {
    let parent = target.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| QueueError::persistence(parent, e))?;
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut attempt = 1;
    let temp = loop {
        let temp = parent.join(format!(
            ".{}.tmp-{}-{}",
            file_name,
            std::process::id(),
            Uuid::new_v4().simple()
        ));
        match write_synced(&temp, content) {
            Ok(()) => break temp,
            Err(e) => {
                let _ = fs::remove_file(&temp);
                if attempt >= WRITE_ATTEMPTS {
                    return Err(QueueError::persistence(&temp, e));
                }
                warn!(
                    "Temp write for {} failed (attempt {}/{}): {}",
                    target.display(),
                    attempt,
                    WRITE_ATTEMPTS,
                    e
                );
                attempt += 1;
                std::thread::sleep(WRITE_RETRY_DELAY);
            }
        }
    };

    if let Err(e) = fs::rename(&temp, target) {
        let _ = fs::remove_file(&temp);
        return Err(QueueError::persistence(target, e));
    }

    sync_dir(parent);
    Ok(())
}

fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}

/// Best-effort fsync of a directory so a rename survives power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Directory fsync failed for {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
