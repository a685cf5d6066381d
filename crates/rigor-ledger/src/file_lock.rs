//! Advisory lock on a session's ledger, shared by every process on the host.
//!
//! Held across tip recovery and the append itself, so two ledgers opened on
//! the same root (two `rigor submit` processes, say) never hand out the same
//! sequence number.

use std::path::PathBuf;

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

pub const LOCK_FILE: &str = "ledger.lock";

/// Exclusive lock, released on drop.
pub struct LedgerFileLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<std::fs::File>,
    #[cfg(not(unix))]
    _file: std::fs::File,
}

impl LedgerFileLock {
    /// Block (off the runtime) until the lock at `path` is ours.
    pub async fn acquire(path: PathBuf) -> StorageResult<Self> {
        tokio::task::spawn_blocking(move || Self::acquire_blocking(path))
            .await
            .map_err(|e| StorageError::Backend(format!("ledger lock task failed: {e}")))?
    }

    #[cfg(unix)]
    fn acquire_blocking(path: PathBuf) -> StorageResult<Self> {
        use nix::fcntl::{Flock, FlockArg};

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        let flock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| std::io::Error::from(errno))?;
        Ok(Self { _flock: flock })
    }

    // No cross-process exclusion here; the in-process session lock still applies.
    #[cfg(not(unix))]
    fn acquire_blocking(path: PathBuf) -> StorageResult<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        Ok(Self { _file: file })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_holder_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);

        let first = LedgerFileLock::acquire(path.clone()).await.unwrap();
        let waiter = tokio::spawn(LedgerFileLock::acquire(path));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_ok());
    }
}
