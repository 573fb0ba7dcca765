//! core::ops
//!
//! Locking and rollback primitives shared by every ref-mutating operation.
//!
//! # Modules
//!
//! - [`lock`] - Per-repository exclusive locks
//! - [`rollback`] - Restore branches to a pre-push snapshot
//!
//! # Architecture
//!
//! Every operation that changes a repository's refs:
//! 1. Acquires that repository's lock
//! 2. Snapshots the branches it might change
//! 3. On failure, rolls back to the snapshot before releasing the lock

pub mod lock;
pub mod rollback;

pub use lock::{LockError, RepoLockGuard, RepoLockManager};
pub use rollback::{rollback_changes, rollback_stray, RollbackError, RollbackResult};
