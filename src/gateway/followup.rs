//! gateway::followup
//!
//! Ensure-PR follow-ups after an accepted mirrored push.
//!
//! Each follow-up runs on its own task and is an ordinary lock holder: it
//! re-acquires the repository lock, checks that the branch still exists,
//! then finds or creates the pull request. Failures are logged only; the
//! client has already been answered.

use std::sync::{Arc, PoisonError};

use thiserror::Error;

use super::Gateway;
use crate::core::ops::LockError;
use crate::core::types::{BranchName, Repository};
use crate::forge::{CreatePrRequest, Forge, ForgeError, PullRequest};
use crate::git::{Git, GitError};

#[derive(Debug, Error)]
pub enum FollowUpError {
    #[error("cannot read local branch: {0}")]
    Git(#[from] GitError),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// What an ensure-PR pass did.
#[derive(Debug)]
pub enum FollowUpOutcome {
    Existing(PullRequest),
    Created(PullRequest),
    /// The branch was deleted before the follow-up ran.
    BranchGone,
}

impl Gateway {
    /// Spawn one ensure-PR task per branch, skipping the PR base itself.
    pub(super) fn spawn_followups(self: &Arc<Self>, repo: &Repository, branches: Vec<BranchName>) {
        let Some(forge) = self.forge(&repo.id) else {
            return;
        };
        let base = self
            .options
            .pr_base
            .clone()
            .unwrap_or_else(|| repo.default_branch.clone());

        let mut tasks = self
            .followups
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for branch in branches.into_iter().filter(|b| *b != base) {
            let gateway = Arc::clone(self);
            let forge = Arc::clone(&forge);
            let repo = repo.clone();
            let base = base.clone();
            tasks.spawn(async move {
                match gateway.ensure_pr(forge.as_ref(), &repo, &branch, &base).await {
                    Ok(FollowUpOutcome::Created(pr)) => {
                        tracing::info!(repo = %repo.id, branch = %branch, url = %pr.url, "opened pull request")
                    }
                    Ok(FollowUpOutcome::Existing(pr)) => {
                        tracing::debug!(repo = %repo.id, branch = %branch, number = pr.number, "pull request exists")
                    }
                    Ok(FollowUpOutcome::BranchGone) => {
                        tracing::debug!(repo = %repo.id, branch = %branch, "branch gone; no pull request")
                    }
                    Err(e) => {
                        tracing::warn!(repo = %repo.id, branch = %branch, forge = forge.name(), error = %e, "ensure-PR failed")
                    }
                }
            });
        }
    }

    /// Find or create the open PR for `branch` into `base`, under the lock.
    pub async fn ensure_pr(
        &self,
        forge: &dyn Forge,
        repo: &Repository,
        branch: &BranchName,
        base: &BranchName,
    ) -> Result<FollowUpOutcome, FollowUpError> {
        let guard = self.locks.acquire(&repo.id).await?;

        if Git::open_bare(&repo.path)?.branch_tip(branch)?.is_none() {
            return Ok(FollowUpOutcome::BranchGone);
        }

        if let Some(pr) = forge.find_pr_by_head(branch.as_str()).await? {
            return Ok(FollowUpOutcome::Existing(pr));
        }
        let pr = forge
            .create_pr(CreatePrRequest {
                head: branch.to_string(),
                base: base.to_string(),
                title: branch.to_string(),
                body: Some(format!("Opened by mirrorgate after a push to `{branch}`.")),
                draft: false,
            })
            .await?;
        guard.release();
        Ok(FollowUpOutcome::Created(pr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::mock::{FailOn, MockForge, MockOperation};
    use crate::gateway::tests::{local_repo, registry};
    use tempfile::TempDir;

    fn seed_branch(repo: &Repository, name: &str) {
        let git = git2::Repository::open_bare(&repo.path).unwrap();
        let sig = git2::Signature::now("t", "t@example.com").unwrap();
        let tree = git.find_tree(git.treebuilder(None).unwrap().write().unwrap()).unwrap();
        git.commit(Some(&format!("refs/heads/{name}")), &sig, &sig, "c", &tree, &[])
            .unwrap();
    }

    fn main() -> BranchName {
        BranchName::main()
    }

    #[tokio::test]
    async fn creates_then_finds() {
        let temp = TempDir::new().unwrap();
        let gw = Gateway::builder(registry(&temp)).build();
        let repo = local_repo(gw.registry(), "app");
        seed_branch(&repo, "feature/T1");
        let forge = MockForge::new();
        let branch = BranchName::new("feature/T1").unwrap();

        let first = gw.ensure_pr(&forge, &repo, &branch, &main()).await.unwrap();
        assert!(matches!(first, FollowUpOutcome::Created(ref pr) if pr.base == "main"));
        let second = gw.ensure_pr(&forge, &repo, &branch, &main()).await.unwrap();
        assert!(matches!(second, FollowUpOutcome::Existing(_)));
        assert_eq!(forge.pr_count(), 1);
        assert!(!gw.locks().is_locked(&repo.id));
    }

    #[tokio::test]
    async fn deleted_branch_is_skipped() {
        let temp = TempDir::new().unwrap();
        let gw = Gateway::builder(registry(&temp)).build();
        let repo = local_repo(gw.registry(), "app");
        let forge = MockForge::new();

        let outcome = gw
            .ensure_pr(&forge, &repo, &BranchName::new("gone").unwrap(), &main())
            .await
            .unwrap();
        assert!(matches!(outcome, FollowUpOutcome::BranchGone));
        assert!(forge.operations().is_empty());
    }

    #[tokio::test]
    async fn forge_failure_releases_lock() {
        let temp = TempDir::new().unwrap();
        let gw = Gateway::builder(registry(&temp)).build();
        let repo = local_repo(gw.registry(), "app");
        seed_branch(&repo, "feature/T1");
        let forge = MockForge::new().fail_on(FailOn::CreatePr(ForgeError::RateLimited));

        let err = gw
            .ensure_pr(&forge, &repo, &BranchName::new("feature/T1").unwrap(), &main())
            .await
            .unwrap_err();
        assert!(matches!(err, FollowUpError::Forge(ForgeError::RateLimited)));
        assert!(!gw.locks().is_locked(&repo.id));
        assert_eq!(
            forge.operations(),
            vec![
                MockOperation::FindPrByHead {
                    head: "feature/T1".into()
                },
                MockOperation::CreatePr {
                    head: "feature/T1".into(),
                    base: "main".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn spawned_followups_skip_the_base() {
        let temp = TempDir::new().unwrap();
        let forge = MockForge::new();
        let registry = registry(&temp);
        let repo = local_repo(&registry, "app");
        seed_branch(&repo, "feature/T1");
        seed_branch(&repo, "main");
        let gw = Gateway::builder(registry)
            .forge(repo.id.clone(), Arc::new(forge.clone()))
            .build();

        gw.spawn_followups(
            &repo,
            vec![main(), BranchName::new("feature/T1").unwrap()],
        );
        gw.wait_for_followups().await;

        let prs = forge.all_prs();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].head, "feature/T1");
    }
}
