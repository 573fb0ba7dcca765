//! core::ops::rollback
//!
//! Restore branches to their pre-push image.
//!
//! Used when a push is accepted by receive-pack but must not stand: the
//! credential was confined to another branch, or the upstream push failed.
//!
//! # CAS Semantics
//!
//! Each restore is compare-and-swap against the post-push value. The caller
//! holds the repository lock, so a CAS failure means something outside the
//! gateway wrote to the repository directory; that branch is reported as
//! failed and the remaining branches are still restored.

use thiserror::Error;

use crate::core::types::{Oid, RefName};
use crate::git::{BranchChange, Git, GitError, StrayChange};

/// Errors from rollback operations.
#[derive(Debug, Error)]
pub enum RollbackError {
    /// Ref moved since the post-push snapshot.
    #[error("rollback CAS failed for {refname}: expected {expected}, found {actual}")]
    CasFailed {
        refname: String,
        expected: String,
        actual: String,
    },

    /// Git operation failed during rollback.
    #[error("git error during rollback: {0}")]
    Git(String),
}

impl From<GitError> for RollbackError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::CasFailed {
                refname,
                expected,
                actual,
            } => RollbackError::CasFailed {
                refname,
                expected,
                actual,
            },
            other => RollbackError::Git(other.to_string()),
        }
    }
}

/// Result of a rollback attempt.
#[derive(Debug)]
pub struct RollbackResult {
    /// Refs that were successfully restored.
    pub rolled_back: Vec<String>,
    /// Refs that could not be restored, with the reason.
    pub failed: Vec<(String, RollbackError)>,
}

impl RollbackResult {
    fn new() -> Self {
        Self {
            rolled_back: vec![],
            failed: vec![],
        }
    }

    /// Whether every ref was restored.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Get a summary string for logs.
    pub fn summary(&self) -> String {
        if self.is_complete() {
            format!("rolled back {} branch(es)", self.rolled_back.len())
        } else {
            format!(
                "partial rollback: {} restored, {} failed",
                self.rolled_back.len(),
                self.failed.len()
            )
        }
    }
}

/// Undo `changes`, restoring each branch's `before` tip.
///
/// A branch absent before the push is deleted; a branch the push deleted is
/// recreated at its old tip.
pub fn rollback_changes(git: &Git, changes: &[BranchChange]) -> RollbackResult {
    let mut result = RollbackResult::new();

    for change in changes {
        let refname = RefName::for_branch(&change.branch);
        match restore(git, refname.as_str(), change.before.as_ref(), change.after.as_ref()) {
            Ok(()) => {
                tracing::warn!(
                    branch = %change.branch,
                    restored = change.before.as_ref().map(|o| o.short(12)).unwrap_or("<deleted>"),
                    "branch rolled back"
                );
                result.rolled_back.push(refname.to_string());
            }
            Err(err) => {
                tracing::error!(branch = %change.branch, error = %err, "branch rollback failed");
                result.failed.push((refname.to_string(), err.into()));
            }
        }
    }

    result
}

/// Undo changes to refs whose names are not valid branch names, adding the
/// outcome to `result`.
pub fn rollback_stray(git: &Git, changes: &[StrayChange], result: &mut RollbackResult) {
    for change in changes {
        match restore(git, &change.refname, change.before.as_ref(), change.after.as_ref()) {
            Ok(()) => {
                tracing::warn!(refname = %change.refname, "unrepresentable ref rolled back");
                result.rolled_back.push(change.refname.clone());
            }
            Err(err) => {
                tracing::error!(refname = %change.refname, error = %err, "ref rollback failed");
                result.failed.push((change.refname.clone(), err.into()));
            }
        }
    }
}

fn restore(
    git: &Git,
    refname: &str,
    before: Option<&Oid>,
    after: Option<&Oid>,
) -> Result<(), GitError> {
    match (before, after) {
        (Some(before), after) => git.update_ref_cas(refname, before, after, "mirrorgate: rollback"),
        (None, Some(after)) => git.delete_ref_cas(refname, after),
        (None, None) => Ok(()),
    }
}
