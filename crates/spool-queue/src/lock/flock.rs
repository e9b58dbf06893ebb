//! OS advisory lock strategy (`flock(2)`).

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{Attempt, LockRecord, LockStrategy};
use crate::error::QueueError;

#[cfg(unix)]
type Held = nix::fcntl::Flock<std::fs::File>;
#[cfg(not(unix))]
type Held = std::fs::File;

/// Exclusive `flock` on a dedicated lock file.
///
/// The kernel drops the lock when the holder exits, so a crashed holder never
/// leaves a stale lock behind. The holder record is written into the file for
/// diagnostics only.
#[derive(Debug)]
pub struct FlockStrategy {
    path: PathBuf,
    held: Mutex<Option<(String, Held)>>,
}

impl FlockStrategy {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            held: Mutex::new(None),
        }
    }

    /// Return a strategy if the filesystem holding `path` supports `flock`.
    #[cfg(unix)]
    pub fn probe(path: PathBuf) -> Result<Option<Self>, QueueError> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let file = open_lock_file(&path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            // Dropping the probe handle unlocks it again.
            Ok(_probe) => Ok(Some(Self::new(path))),
            Err((_, Errno::EWOULDBLOCK)) => Ok(Some(Self::new(path))),
            Err((_, errno)) => {
                tracing::debug!("flock unsupported at {}: {}", path.display(), errno);
                Ok(None)
            }
        }
    }

    #[cfg(not(unix))]
    pub fn probe(_path: PathBuf) -> Result<Option<Self>, QueueError> {
        Ok(None)
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, QueueError> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| QueueError::lock(path, e))
}

#[cfg(unix)]
fn write_record(file: &std::fs::File, path: &Path, record: &LockRecord) -> Result<(), QueueError> {
    use std::io::{Seek, SeekFrom, Write};

    let content = serde_json::to_vec(record).map_err(|e| QueueError::lock(path, e))?;
    let mut f = file;
    f.set_len(0).map_err(|e| QueueError::lock(path, e))?;
    f.seek(SeekFrom::Start(0)).map_err(|e| QueueError::lock(path, e))?;
    f.write_all(&content).map_err(|e| QueueError::lock(path, e))?;
    Ok(())
}

impl LockStrategy for FlockStrategy {
    fn name(&self) -> &'static str {
        "flock"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_acquire(&self, record: &LockRecord) -> Result<Attempt, QueueError> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let file = open_lock_file(&self.path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                write_record(&lock, &self.path, record)?;
                *self.held.lock() = Some((record.token.clone(), lock));
                Ok(Attempt::Acquired)
            }
            Err((_, Errno::EWOULDBLOCK)) => Ok(Attempt::Contended),
            Err((_, errno)) => Err(QueueError::lock(&self.path, errno)),
        }
    }

    #[cfg(not(unix))]
    fn try_acquire(&self, _record: &LockRecord) -> Result<Attempt, QueueError> {
        Err(QueueError::lock(&self.path, "flock is not available on this platform"))
    }

    fn release(&self, record: &LockRecord) -> Result<(), QueueError> {
        let mut held = self.held.lock();
        let ours = matches!(held.as_ref(), Some((token, _)) if *token == record.token);
        if ours {
            if let Some((_, lock)) = held.take() {
                // Truncate so a reader never mistakes an old record for a live holder.
                let _ = lock.set_len(0);
                drop(lock);
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_supported_on_local_fs() {
        let dir = TempDir::new().unwrap();
        let strategy = FlockStrategy::probe(dir.path().join("queue.lock")).unwrap();
        assert!(strategy.is_some());
    }

    #[test]
    fn test_second_handle_is_contended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.lock");
        let a = FlockStrategy::probe(path.clone()).unwrap().unwrap();
        let b = FlockStrategy::probe(path).unwrap().unwrap();

        let rec_a = LockRecord::current();
        let rec_b = LockRecord::current();
        assert_eq!(a.try_acquire(&rec_a).unwrap(), Attempt::Acquired);
        assert_eq!(b.try_acquire(&rec_b).unwrap(), Attempt::Contended);

        a.release(&rec_a).unwrap();
        assert_eq!(b.try_acquire(&rec_b).unwrap(), Attempt::Acquired);
        b.release(&rec_b).unwrap();
    }

    #[test]
    fn test_record_written_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.lock");
        let strategy = FlockStrategy::probe(path.clone()).unwrap().unwrap();

        let record = LockRecord::current();
        strategy.try_acquire(&record).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let on_disk: LockRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(on_disk, record);

        strategy.release(&record).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_release_with_foreign_record_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.lock");
        let strategy = FlockStrategy::probe(path.clone()).unwrap().unwrap();
        let other = FlockStrategy::probe(path).unwrap().unwrap();

        let record = LockRecord::current();
        strategy.try_acquire(&record).unwrap();
        strategy.release(&LockRecord::current()).unwrap();

        let probe = LockRecord::current();
        assert_eq!(other.try_acquire(&probe).unwrap(), Attempt::Contended);

        strategy.release(&record).unwrap();
        strategy.release(&record).unwrap();
    }
}
