//! PID-file lock strategy, used where `flock` is unavailable.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::{Attempt, LockRecord, LockStrategy};
use crate::error::QueueError;

/// How long a reclaim marker may live before it is itself considered stale.
const RECLAIM_MARKER_GRACE: Duration = Duration::from_secs(10);

/// Grace period for a record that does not parse yet (writer still filling it).
const UNPARSABLE_RECORD_GRACE: Duration = Duration::from_secs(5);

/// Lock record file created with an exclusive create.
///
/// A record naming a dead process is stale and gets reclaimed. Reclamation
/// runs under a second exclusive-create marker so two reclaimers cannot both
/// delete a record, one of which may already be a fresh holder's.
///
/// PID reuse can make a stale record look live until that pid goes away;
/// there is no heartbeat.
#[derive(Debug)]
pub struct PidFileStrategy {
    path: PathBuf,
}

/// What is currently on disk at the record path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OnDisk {
    Missing,
    Record(LockRecord),
    Garbage { age: Duration },
}

impl PidFileStrategy {
    /// Create a new PID-file strategy.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn marker_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".reclaim");
        PathBuf::from(name)
    }

    fn read(&self) -> Result<OnDisk, QueueError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(OnDisk::Missing),
            Err(e) => return Err(QueueError::lock(&self.path, e)),
        };

        match serde_json::from_str::<LockRecord>(&content) {
            Ok(record) => Ok(OnDisk::Record(record)),
            Err(_) => Ok(OnDisk::Garbage {
                age: file_age(&self.path).unwrap_or_default(),
            }),
        }
    }

    /// Publish `record` at the lock path only if nothing is there.
    ///
    /// The record is written to a private file first and hard-linked into
    /// place, so the lock file is never observed half written. Filesystems
    /// without hard links fall back to a plain exclusive create.
    fn create_exclusive(&self, record: &LockRecord) -> Result<bool, QueueError> {
        let content = serde_json::to_vec(record).map_err(|e| QueueError::lock(&self.path, e))?;

        let mut staging = self.path.as_os_str().to_owned();
        staging.push(format!(".tmp-{}", record.token));
        let staging = PathBuf::from(staging);

        write_synced(&staging, &content).map_err(|e| QueueError::lock(&staging, e))?;
        let linked = fs::hard_link(&staging, &self.path);
        let _ = fs::remove_file(&staging);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => {
                debug!(
                    "hard link unavailable for {} ({}), using exclusive create",
                    self.path.display(),
                    e
                );
                match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                    Ok(mut file) => {
                        file.write_all(&content)
                            .and_then(|_| file.sync_all())
                            .map_err(|e| QueueError::lock(&self.path, e))?;
                        Ok(true)
                    }
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                    Err(e) => Err(QueueError::lock(&self.path, e)),
                }
            }
        }
    }

    /// Remove `stale` from disk if it is still what the lock path holds.
    fn reclaim(&self, stale: &OnDisk) -> Result<bool, QueueError> {
        let marker = self.marker_path();
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if file_age(&marker).is_some_and(|age| age > RECLAIM_MARKER_GRACE) {
                    warn!("Removing abandoned reclaim marker: {}", marker.display());
                    let _ = fs::remove_file(&marker);
                }
                return Ok(false);
            }
            Err(e) => return Err(QueueError::lock(&marker, e)),
        }

        let result = self.remove_if_unchanged(stale);
        if let Err(e) = fs::remove_file(&marker) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove reclaim marker {}: {}", marker.display(), e);
            }
        }
        result
    }

    fn remove_if_unchanged(&self, stale: &OnDisk) -> Result<bool, QueueError> {
        let unchanged = match (stale, self.read()?) {
            (OnDisk::Record(expected), OnDisk::Record(current)) => *expected == current,
            (OnDisk::Garbage { .. }, OnDisk::Garbage { .. }) => true,
            _ => false,
        };
        if !unchanged {
            return Ok(false);
        }

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(QueueError::lock(&self.path, e)),
        }
    }
}

impl LockStrategy for PidFileStrategy {
    fn name(&self) -> &'static str {
        "pid-file"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn try_acquire(&self, record: &LockRecord) -> Result<Attempt, QueueError> {
        if self.create_exclusive(record)? {
            return Ok(Attempt::Acquired);
        }

        let on_disk = self.read()?;
        match &on_disk {
            // Holder released between our create and read.
            OnDisk::Missing => Ok(Attempt::Reclaimed),
            OnDisk::Record(existing) if is_process_running(existing.pid) => Ok(Attempt::Contended),
            OnDisk::Record(existing) => {
                warn!(
                    "Reclaiming stale queue lock (PID {} not running, acquired {}): {}",
                    existing.pid,
                    existing.acquired_at,
                    self.path.display()
                );
                if self.reclaim(&on_disk)? {
                    Ok(Attempt::Reclaimed)
                } else {
                    Ok(Attempt::Contended)
                }
            }
            OnDisk::Garbage { age } if *age < UNPARSABLE_RECORD_GRACE => Ok(Attempt::Contended),
            OnDisk::Garbage { .. } => {
                warn!("Reclaiming unreadable queue lock record: {}", self.path.display());
                if self.reclaim(&on_disk)? {
                    Ok(Attempt::Reclaimed)
                } else {
                    Ok(Attempt::Contended)
                }
            }
        }
    }

    fn release(&self, record: &LockRecord) -> Result<(), QueueError> {
        match self.read()? {
            OnDisk::Record(current) if current.pid == record.pid && current.token == record.token => {
                match fs::remove_file(&self.path) {
                    Ok(()) => {
                        debug!("Released queue lock: {}", self.path.display());
                        Ok(())
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(QueueError::lock(&self.path, e)),
                }
            }
            OnDisk::Record(current) => {
                warn!(
                    "Queue lock now held by PID {}, not releasing: {}",
                    current.pid,
                    self.path.display()
                );
                Ok(())
            }
            OnDisk::Missing | OnDisk::Garbage { .. } => Ok(()),
        }
    }
}

fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Check if a process with the given PID is running.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    // Signal 0 only checks for existence; EPERM still means the process exists.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    // On non-Unix systems, assume process is running if we can't check
    true
}

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;
