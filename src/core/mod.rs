//! core
//!
//! Domain types, configuration, and the lock/rollback primitives.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchName, Oid, RepoId, Credential, etc.
//! - [`config`] - Configuration schema and loading
//! - [`ops`] - Per-repository locking and pre-image rollback

pub mod config;
pub mod ops;
pub mod types;
