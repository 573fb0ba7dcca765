//! core::ops::lock
//!
//! Per-repository exclusive locks.
//!
//! # Architecture
//!
//! [`RepoLockManager`] owns a map from repository id to an async mutex. The
//! map itself sits behind a small synchronous mutex that is held only long
//! enough to find or insert an entry; callers block on the per-repository
//! mutex, never on the map. Entries are created on first use and kept for
//! the life of the manager.
//!
//! A manager built with [`RepoLockManager::with_lock_files`] also takes an
//! OS-level exclusive lock on `<repos_dir>/<id>.git/mirrorgate.lock` via
//! `fs2`, after the in-process mutex. That serializes a running server with
//! the CLI's `sync`, `push` and `reconcile` commands on the same
//! repositories. The file lock is polled rather than blocked on, so a
//! cancelled acquisition leaves nothing behind.
//!
//! # Invariants
//!
//! - At most one [`RepoLockGuard`] exists per repository at any time, across
//!   every process sharing the repository directory when lock files are on
//! - The lock is released exactly once: on [`RepoLockGuard::release`] or on drop
//! - Locks are not reentrant; code holding a guard must not acquire the same repository again
//! - Without lock files, acquisition never fails, it only waits
//!
//! # Example
//!
//! ```
//! use mirrorgate::core::ops::lock::RepoLockManager;
//! use mirrorgate::core::types::RepoId;
//!
//! # tokio_test::block_on(async {
//! let locks = RepoLockManager::new();
//! let repo = RepoId::new("app").unwrap();
//!
//! let guard = locks.acquire(&repo).await.unwrap();
//! assert!(locks.is_locked(&repo));
//! guard.release();
//! assert!(!locks.is_locked(&repo));
//! # });
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::core::types::RepoId;

/// Name of the lock file inside each bare repository.
pub const LOCK_FILE_NAME: &str = "mirrorgate.lock";

/// How long to wait between attempts on a file lock held elsewhere.
const FILE_LOCK_POLL: Duration = Duration::from_millis(25);

/// Errors from taking a file lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Registry of per-repository locks.
#[derive(Debug, Default)]
pub struct RepoLockManager {
    locks: Mutex<HashMap<RepoId, Arc<AsyncMutex<()>>>>,
    /// Directory holding `<id>.git`; `None` means in-process locks only.
    repos_dir: Option<PathBuf>,
}

impl RepoLockManager {
    /// In-process locks only.
    pub fn new() -> Self {
        Self::default()
    }

    /// In-process locks plus a file lock in each `<repos_dir>/<id>.git`.
    pub fn with_lock_files(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            locks: Mutex::default(),
            repos_dir: Some(repos_dir.into()),
        }
    }

    /// Path of `repo`'s lock file, if this manager uses them.
    pub fn lock_file(&self, repo: &RepoId) -> Option<PathBuf> {
        self.repos_dir
            .as_ref()
            .map(|dir| dir.join(format!("{repo}.git")).join(LOCK_FILE_NAME))
    }

    /// The mutex for `repo`, created on first use.
    fn slot(&self, repo: &RepoId) -> Arc<AsyncMutex<()>> {
        // The map only ever grows and holds no invariants a panic could break.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(repo.clone()).or_default())
    }

    /// Wait for exclusive access to `repo`.
    ///
    /// The returned guard releases the lock when dropped, so every exit
    /// path (including `?`, panics, and cancelled futures) releases it.
    ///
    /// # Errors
    ///
    /// - [`LockError::Io`] if the lock file cannot be opened or locked
    pub async fn acquire(&self, repo: &RepoId) -> Result<RepoLockGuard, LockError> {
        let started = Instant::now();
        let guard = self.slot(repo).lock_owned().await;
        let file = match self.lock_file(repo) {
            Some(path) => Some(lock_file_exclusive(&path).await?),
            None => None,
        };
        tracing::debug!(
            repo = %repo,
            waited_ms = started.elapsed().as_millis() as u64,
            "repository lock acquired"
        );
        Ok(RepoLockGuard {
            repo: repo.clone(),
            acquired: Instant::now(),
            file,
            _guard: guard,
        })
    }

    /// Whether some operation currently holds `repo`'s lock.
    pub fn is_locked(&self, repo: &RepoId) -> bool {
        self.slot(repo).try_lock().is_err()
    }

    /// Number of repositories that have ever been locked.
    pub fn known_repositories(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Open `path` and poll until an exclusive OS lock on it is ours.
async fn lock_file_exclusive(path: &Path) -> Result<File, LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(io_err)?;
    let mut logged = false;
    loop {
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if !logged {
                    tracing::debug!(path = %path.display(), "lock file held by another process; waiting");
                    logged = true;
                }
                tokio::time::sleep(FILE_LOCK_POLL).await;
            }
            Err(e) => return Err(io_err(e)),
        }
    }
}

/// Exclusive hold on one repository.
///
/// Not `Clone`; releasing consumes the guard, so a double release cannot
/// be expressed.
#[derive(Debug)]
#[must_use = "the repository is unlocked as soon as the guard is dropped"]
pub struct RepoLockGuard {
    repo: RepoId,
    acquired: Instant,
    /// Unlocked before the in-process mutex is released.
    file: Option<File>,
    _guard: OwnedMutexGuard<()>,
}

impl RepoLockGuard {
    /// The repository this guard holds.
    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    /// Release the lock now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RepoLockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!(repo = %self.repo, error = %e, "cannot unlock lock file; closing it");
            }
        }
        tracing::debug!(
            repo = %self.repo,
            held_ms = self.acquired.elapsed().as_millis() as u64,
            "repository lock released"
        );
    }
}
