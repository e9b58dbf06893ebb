//! Cross-process mutual exclusion for the queue document.
//!
//! One [`LockManager`] wraps one [`LockStrategy`], picked once when the queue
//! is opened. Callers only ever see [`LockManager::acquire`] and the RAII
//! [`LockGuard`]; they never branch on the platform.

mod flock;
mod pid;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spool_config::LockStrategyKind;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueueError;

pub use flock::FlockStrategy;
pub use pid::{is_process_running, PidFileStrategy};

/// File name of the advisory lock used by [`FlockStrategy`].
pub const FLOCK_FILE: &str = "queue.lock";
/// File name of the lock record used by [`PidFileStrategy`].
pub const PID_FILE: &str = "queue.pid";

/// Who holds the lock, written into the lock resource.
///
/// `token` is unique per acquisition so two handles inside one process can
/// tell their records apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// Record for the current process with a fresh token.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            token: Uuid::new_v4().to_string(),
            acquired_at: Utc::now(),
        }
    }
}

/// Outcome of a single non-blocking acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The lock is now held with the supplied record.
    Acquired,
    /// Another live holder owns the lock.
    Contended,
    /// A stale holder was removed; retry without sleeping.
    Reclaimed,
}

/// A way of obtaining exclusive access to the queue.
pub trait LockStrategy: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Path of the lock resource.
    fn path(&self) -> &Path;

    /// Try once, without blocking, to take the lock for `record`.
    fn try_acquire(&self, record: &LockRecord) -> Result<Attempt, QueueError>;

    /// Give the lock up if it is still held under `record`.
    ///
    /// Must be idempotent and must never release a lock taken by someone else.
    fn release(&self, record: &LockRecord) -> Result<(), QueueError>;
}

/// Exponential backoff with jitter between acquisition attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(500),
        }
    }
}

impl Backoff {
    /// Delay before attempt `attempt + 1`: `initial * 2^attempt`, capped, plus up to 25% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max);
        let jitter_range = (base.as_millis() as u64 / 4).max(1);
        let jitter = (Uuid::new_v4().as_u128() % u128::from(jitter_range)) as u64;
        base + Duration::from_millis(jitter)
    }
}

/// Serialises every queue mutation behind one coarse lock.
#[derive(Debug, Clone)]
pub struct LockManager {
    strategy: Arc<dyn LockStrategy>,
    timeout: Duration,
    backoff: Backoff,
}

impl LockManager {
    /// Wrap an explicit strategy.
    pub fn new(strategy: Arc<dyn LockStrategy>, timeout: Duration) -> Self {
        Self {
            strategy,
            timeout,
            backoff: Backoff::default(),
        }
    }

    /// Pick a strategy for `dir` according to `kind`.
    ///
    /// `Auto` probes whether the filesystem honours `flock` and falls back to
    /// the PID-file protocol when it does not.
    pub fn probe(dir: &Path, kind: LockStrategyKind, timeout: Duration) -> Result<Self, QueueError> {
        std::fs::create_dir_all(dir).map_err(|e| QueueError::lock(dir, e))?;

        let pid_strategy = || -> Arc<dyn LockStrategy> { Arc::new(PidFileStrategy::new(dir.join(PID_FILE))) };

        let strategy: Arc<dyn LockStrategy> = match kind {
            LockStrategyKind::PidFile => pid_strategy(),
            LockStrategyKind::Flock => match FlockStrategy::probe(dir.join(FLOCK_FILE))? {
                Some(strategy) => Arc::new(strategy),
                None => {
                    warn!(
                        "flock requested but not supported for {}, using PID file",
                        dir.display()
                    );
                    pid_strategy()
                }
            },
            LockStrategyKind::Auto => match FlockStrategy::probe(dir.join(FLOCK_FILE))? {
                Some(strategy) => Arc::new(strategy),
                None => pid_strategy(),
            },
        };

        info!(
            "Queue lock strategy: {} ({})",
            strategy.name(),
            strategy.path().display()
        );
        Ok(Self::new(strategy, timeout))
    }

    /// Override the backoff schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn path(&self) -> PathBuf {
        self.strategy.path().to_path_buf()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block (asynchronously) until the lock is held or the timeout elapses.
    pub async fn acquire(&self) -> Result<LockGuard, QueueError> {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let record = LockRecord::current();
            let outcome = self.strategy.try_acquire(&record)?;
            match outcome {
                Attempt::Acquired => {
                    debug!(
                        "Acquired queue lock {} after {} attempt(s)",
                        self.strategy.path().display(),
                        attempt + 1
                    );
                    return Ok(LockGuard {
                        strategy: Arc::clone(&self.strategy),
                        record,
                        released: false,
                    });
                }
                Attempt::Reclaimed | Attempt::Contended => {}
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(QueueError::LockTimeout {
                    path: self.strategy.path().to_path_buf(),
                    waited: elapsed,
                });
            }
            if outcome == Attempt::Reclaimed {
                continue;
            }

            let delay = self.backoff.delay(attempt).min(self.timeout - elapsed);
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
        }
    }

    /// Run `op` while holding the lock; the lock is released on every exit path.
    pub async fn with_lock<F, Fut, T>(&self, op: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let guard = self.acquire().await?;
        let result = op().await;
        let released = guard.release();
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    warn!("Failed to release queue lock after error: {}", release_err);
                }
                Err(e)
            }
        }
    }
}

/// Proof that the queue lock is held. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    strategy: Arc<dyn LockStrategy>,
    record: LockRecord,
    released: bool,
}

impl LockGuard {
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Release explicitly and surface any error.
    pub fn release(mut self) -> Result<(), QueueError> {
        self.released = true;
        self.strategy.release(&self.record)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.strategy.release(&self.record) {
                warn!("Failed to release queue lock on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
