//! Repository write lock
//!
//! All write sequences hold an exclusive lock file rooted at the storage
//! directory. Acquisition is non-blocking with a short bounded retry; an
//! unavailable lock surfaces as a transient `Busy` error and the caller
//! decides whether to retry. A crashed writer's lock goes stale after 30
//! seconds and is taken over.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

const LOCK_FILE: &str = ".engram.lock";
const RETRY_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_millis(40);
const STALE_AFTER_SECS: i64 = 30;

/// Metadata recorded in the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process id of the holder
    pub pid: u32,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

/// Exclusive repository lock, released on drop
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    /// Acquire the lock under `storage_root` with bounded retry.
    pub fn acquire(storage_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_root)?;
        let path = storage_root.join(LOCK_FILE);

        for attempt in 0..RETRY_ATTEMPTS {
            match Self::try_create(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    Self::remove_if_stale(&path);
                    if attempt + 1 < RETRY_ATTEMPTS {
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
                Err(e) => return Err(MemoryError::Io(e)),
            }
        }

        let holder = Self::read_info(&path)
            .map(|info| format!("pid {} since {}", info.pid, info.acquired_at))
            .unwrap_or_else(|| "unknown holder".to_string());
        Err(MemoryError::Busy(format!(
            "repository lock held by {}",
            holder
        )))
    }

    /// Atomic create-new; failure with AlreadyExists means another writer
    /// holds the lock.
    fn try_create(path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let json = serde_json::to_string(&info).unwrap_or_default();
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_info(path: &Path) -> Option<LockInfo> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Remove a lock whose holder died; corrupt lock files count as stale.
    fn remove_if_stale(path: &Path) {
        let stale = match Self::read_info(path) {
            Some(info) => (Utc::now() - info.acquired_at).num_seconds() > STALE_AFTER_SECS,
            None => true,
        };
        if stale {
            tracing::warn!("Removing stale repository lock at {:?}", path);
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to release repository lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        {
            let _lock = RepoLock::acquire(dir.path()).unwrap();
            assert!(dir.path().join(LOCK_FILE).exists());
        }
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = TempDir::new().unwrap();
        let _held = RepoLock::acquire(dir.path()).unwrap();
        let err = RepoLock::acquire(dir.path()).unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, MemoryError::Busy(_)));
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE);
        let stale = LockInfo {
            pid: 1,
            acquired_at: Utc::now() - chrono::Duration::seconds(STALE_AFTER_SECS + 5),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let _lock = RepoLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn test_corrupt_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "not json").unwrap();
        let _lock = RepoLock::acquire(dir.path()).unwrap();
    }
}
