//! git
//!
//! Single interface for local repository state.
//!
//! # Architecture
//!
//! This module is the **only doorway** to refs and history. No other module
//! imports `git2`. Network transfers (fetch, push, receive-pack,
//! upload-pack) run the `git` binary instead, from [`crate::sync`] and
//! [`crate::gateway`], because git2 has no server-side pack protocol.
//!
//! # Invariants
//!
//! - Rollback ref updates use CAS (compare-and-swap) semantics
//! - No other module calls git2 directly (tests excepted)
//! - All operations return strong types (Oid, BranchName, RefName)

mod interface;

pub use interface::{BranchChange, BranchSnapshot, Git, GitError, StrayChange};
