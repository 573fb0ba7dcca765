//! reconcile
//!
//! Crash-Recovery Reconciler.
//!
//! Runs once at startup, before the listener accepts connections. For every
//! mirrored repository it pushes each local branch that has commits its
//! upstream-tracking ref does not, under the repository lock. That repairs a
//! push the gateway accepted locally but died before propagating.
//!
//! The reconciler never fetches first: a fetch would overwrite exactly the
//! local commits it exists to rescue.
//!
//! A branch with no tracking ref at all counts as ahead. Running the pass
//! twice with no writes in between pushes nothing the second time, since a
//! successful push advances the tracking ref.

use std::sync::Arc;

use thiserror::Error;

use crate::core::ops::LockError;
use crate::core::types::{BranchName, RepoId, Repository};
use crate::gateway::Gateway;
use crate::git::{Git, GitError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reconciliation incomplete: {failed} of {attempted} branch push(es) failed")]
    Incomplete { failed: usize, attempted: usize },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// One branch the reconciler pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replayed {
    pub repo: RepoId,
    pub branch: BranchName,
    /// Commits ahead of the tracking ref; `None` when there was no tracking ref.
    pub ahead: Option<usize>,
}

/// Something the reconciler could not repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unrepaired {
    pub repo: RepoId,
    pub branch: Option<BranchName>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub repositories: usize,
    pub pushed: Vec<Replayed>,
    pub failed: Vec<Unrepaired>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Err when anything failed.
    pub fn into_result(self) -> Result<Self, ReconcileError> {
        if self.is_clean() {
            return Ok(self);
        }
        Err(ReconcileError::Incomplete {
            failed: self.failed.len(),
            attempted: self.failed.len() + self.pushed.len(),
        })
    }
}

/// Startup replay of unpushed local commits.
pub struct Reconciler {
    gateway: Arc<Gateway>,
}

impl Reconciler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Reconcile every mirrored repository.
    ///
    /// Failures are collected in the report; one bad repository does not
    /// stop the others.
    pub async fn run(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for repo in self.gateway.registry().mirrored() {
            report.repositories += 1;
            if let Err(e) = self.reconcile_repository(&repo, &mut report).await {
                tracing::error!(repo = %repo.id, error = %e, "could not reconcile repository");
                report.failed.push(Unrepaired {
                    repo: repo.id.clone(),
                    branch: None,
                    message: e.to_string(),
                });
            }
        }
        tracing::info!(
            repositories = report.repositories,
            pushed = report.pushed.len(),
            failed = report.failed.len(),
            "reconciliation finished"
        );
        report
    }

    async fn reconcile_repository(
        &self,
        repo: &Repository,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let held = self.gateway.locks().acquire(&repo.id).await?;
        let pending = {
            let git = Git::open_bare(&repo.path)?;
            let mut pending = Vec::new();
            for branch in git.list_branches()? {
                let Some(local) = git.branch_tip(&branch)? else {
                    continue;
                };
                let ahead = match git.upstream_tip(&branch)? {
                    Some(upstream) => match git.commit_count(&upstream, &local)? {
                        0 => continue,
                        n => Some(n),
                    },
                    None => None,
                };
                pending.push((branch, ahead));
            }
            pending
        };

        for (branch, ahead) in pending {
            match self
                .gateway
                .sync_service()
                .push_branch(&held, repo, &branch)
                .await
            {
                Ok(()) => {
                    tracing::info!(repo = %repo.id, branch = %branch, ?ahead, "replayed unpushed branch");
                    report.pushed.push(Replayed {
                        repo: repo.id.clone(),
                        branch,
                        ahead,
                    });
                }
                Err(e) => {
                    tracing::error!(repo = %repo.id, branch = %branch, error = %e, "replay push failed");
                    report.failed.push(Unrepaired {
                        repo: repo.id.clone(),
                        branch: Some(branch),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_result() {
        let clean = ReconcileReport::default();
        assert!(clean.into_result().is_ok());

        let mut report = ReconcileReport::default();
        report.failed.push(Unrepaired {
            repo: RepoId::new("app").unwrap(),
            branch: None,
            message: "x".into(),
        });
        assert!(matches!(
            report.into_result(),
            Err(ReconcileError::Incomplete {
                failed: 1,
                attempted: 1
            })
        ));
    }
}
