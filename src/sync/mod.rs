//! sync
//!
//! Upstream Sync Service.
//!
//! # Architecture
//!
//! - [`Upstream`] is the external git client seam: fetch every branch from a
//!   repository's origin, or push one branch to it. [`GitCliUpstream`]
//!   implements it with the `git` binary.
//! - [`SyncService`] wraps an `Upstream` with the local bookkeeping every
//!   caller needs: before/after branch snapshots, upstream-tracking refs,
//!   and the registry's branch set.
//!
//! # Force sync
//!
//! Every caller syncs with `force = true`. Outside a locked operation a
//! mirror is identical to upstream, so overwriting local refs can only
//! discard state that was never accepted. Both `SyncService` methods take
//! the caller's [`RepoLockGuard`] to make "caller holds the lock" a
//! compile-time requirement rather than a convention.

pub mod command;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use thiserror::Error;

use crate::core::ops::RepoLockGuard;
use crate::core::types::{BranchName, RefName, RepoId, Repository};
use crate::git::{BranchChange, Git, GitError};
use crate::registry::Registry;

use command::{config_env, git_command, run, stderr_text, CommandError};

/// Errors from upstream synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The repository has no origin to sync with.
    #[error("repository {repo} does not mirror an origin")]
    NotMirrored { repo: RepoId },

    /// The origin could not be reached or refused our credentials.
    #[error("upstream unreachable for {repo}: {message}")]
    Unreachable { repo: RepoId, message: String },

    /// A non-forced fetch found local history that upstream does not have.
    #[error("local branches of {repo} diverged from upstream: {message}")]
    Diverged { repo: RepoId, message: String },

    /// The origin rejected a branch push.
    #[error("upstream rejected push of {branch} to {repo}: {message}")]
    Rejected {
        repo: RepoId,
        branch: BranchName,
        message: String,
    },

    /// The branch to push does not exist locally.
    #[error("branch {branch} does not exist in {repo}")]
    NoSuchBranch { repo: RepoId, branch: BranchName },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Client for a repository's external origin.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch every origin branch into `refs/heads/*` and
    /// `refs/remotes/origin/*`, pruning branches gone upstream.
    ///
    /// With `force`, local refs are overwritten unconditionally.
    async fn fetch_all(&self, repo: &Repository, force: bool) -> Result<(), SyncError>;

    /// Push one local branch to the same-named origin branch (never forced).
    async fn push(&self, repo: &Repository, branch: &BranchName) -> Result<(), SyncError>;

    /// Delete one branch on origin.
    async fn delete(&self, repo: &Repository, branch: &BranchName) -> Result<(), SyncError>;
}

/// [`Upstream`] backed by the `git` binary.
#[derive(Clone)]
pub struct GitCliUpstream {
    token: Option<String>,
    fetch_timeout: Duration,
    push_timeout: Duration,
}

impl std::fmt::Debug for GitCliUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCliUpstream")
            .field("has_token", &self.token.is_some())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("push_timeout", &self.push_timeout)
            .finish()
    }
}

impl GitCliUpstream {
    pub fn new(token: Option<String>, fetch_timeout: Duration, push_timeout: Duration) -> Self {
        Self {
            token,
            fetch_timeout,
            push_timeout,
        }
    }

    fn command(&self, repo: &Repository) -> tokio::process::Command {
        let mut cmd = git_command(&repo.path);
        let https = repo
            .origin
            .as_deref()
            .is_some_and(|url| url.starts_with("https://"));
        if let (true, Some(token)) = (https, &self.token) {
            let basic = base64::engine::general_purpose::STANDARD
                .encode(format!("x-access-token:{token}"));
            config_env(
                &mut cmd,
                0,
                "http.extraHeader",
                format!("Authorization: Basic {basic}"),
            );
        }
        cmd
    }

    async fn push_refspec(
        &self,
        repo: &Repository,
        branch: &BranchName,
        refspec: String,
    ) -> Result<(), SyncError> {
        if !repo.is_mirrored() {
            return Err(SyncError::NotMirrored {
                repo: repo.id.clone(),
            });
        }
        let mut cmd = self.command(repo);
        cmd.args(["push", "--porcelain", "origin"]).arg(refspec);

        let output = run(cmd, "push", None, Some(self.push_timeout)).await?;
        if output.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = stderr_text(&output);
        // --porcelain reports per-ref rejections on stdout as "!\t<src>:<dst>\t[rejected] ..."
        if stdout.lines().any(|l| l.starts_with('!')) || message.contains("rejected") {
            return Err(SyncError::Rejected {
                repo: repo.id.clone(),
                branch: branch.clone(),
                message: if message.is_empty() {
                    stdout.trim().to_string()
                } else {
                    message
                },
            });
        }
        Err(SyncError::Unreachable {
            repo: repo.id.clone(),
            message,
        })
    }
}

#[async_trait]
impl Upstream for GitCliUpstream {
    async fn fetch_all(&self, repo: &Repository, force: bool) -> Result<(), SyncError> {
        if !repo.is_mirrored() {
            return Err(SyncError::NotMirrored {
                repo: repo.id.clone(),
            });
        }
        let plus = if force { "+" } else { "" };
        let mut cmd = self.command(repo);
        cmd.args(["fetch", "--prune", "--no-tags", "origin"])
            .arg(format!("{plus}refs/heads/*:refs/heads/*"))
            .arg("+refs/heads/*:refs/remotes/origin/*");

        let output = run(cmd, "fetch", None, Some(self.fetch_timeout)).await?;
        if output.status.success() {
            return Ok(());
        }
        let message = stderr_text(&output);
        if !force && message.contains("non-fast-forward") {
            return Err(SyncError::Diverged {
                repo: repo.id.clone(),
                message,
            });
        }
        Err(SyncError::Unreachable {
            repo: repo.id.clone(),
            message,
        })
    }

    async fn push(&self, repo: &Repository, branch: &BranchName) -> Result<(), SyncError> {
        let refname = RefName::for_branch(branch);
        self.push_refspec(repo, branch, format!("{refname}:{refname}"))
            .await
    }

    async fn delete(&self, repo: &Repository, branch: &BranchName) -> Result<(), SyncError> {
        let refname = RefName::for_branch(branch);
        self.push_refspec(repo, branch, format!(":{refname}")).await
    }
}

/// Sync/push with local bookkeeping, for callers that hold the repository lock.
pub struct SyncService {
    upstream: Arc<dyn Upstream>,
    registry: Arc<Registry>,
}

impl SyncService {
    pub fn new(upstream: Arc<dyn Upstream>, registry: Arc<Registry>) -> Self {
        Self { upstream, registry }
    }

    /// Fetch every upstream branch; with `force`, overwrite local refs.
    ///
    /// Returns the local branches the fetch changed.
    pub async fn sync_all_branches(
        &self,
        held: &RepoLockGuard,
        repo: &Repository,
        force: bool,
    ) -> Result<Vec<BranchChange>, SyncError> {
        debug_assert_eq!(held.repo(), &repo.id, "lock guard is for another repository");
        let before = Git::open_bare(&repo.path)?.branch_snapshot()?;

        self.upstream.fetch_all(repo, force).await?;

        let after = Git::open_bare(&repo.path)?.branch_snapshot()?;
        self.registry.refresh_branches(&repo.id, &after);
        self.registry.mark_synced(&repo.id);
        let changes = before.diff(&after);
        if !changes.is_empty() {
            tracing::info!(repo = %repo.id, changed = changes.len(), "synced from upstream");
        }
        Ok(changes)
    }

    /// Push one branch to origin and advance its tracking ref.
    pub async fn push_branch(
        &self,
        held: &RepoLockGuard,
        repo: &Repository,
        branch: &BranchName,
    ) -> Result<(), SyncError> {
        debug_assert_eq!(held.repo(), &repo.id, "lock guard is for another repository");
        let tip = Git::open_bare(&repo.path)?
            .branch_tip(branch)?
            .ok_or_else(|| SyncError::NoSuchBranch {
                repo: repo.id.clone(),
                branch: branch.clone(),
            })?;

        self.upstream.push(repo, branch).await?;

        Git::open_bare(&repo.path)?.force_ref(
            RefName::for_upstream(branch).as_str(),
            &tip,
            "mirrorgate: pushed upstream",
        )?;
        tracing::info!(repo = %repo.id, branch = %branch, tip = tip.short(12), "pushed upstream");
        Ok(())
    }

    /// Delete a branch on origin and drop its tracking ref.
    pub async fn delete_branch(
        &self,
        held: &RepoLockGuard,
        repo: &Repository,
        branch: &BranchName,
    ) -> Result<(), SyncError> {
        debug_assert_eq!(held.repo(), &repo.id, "lock guard is for another repository");
        self.upstream.delete(repo, branch).await?;

        let git = Git::open_bare(&repo.path)?;
        if let Some(tracked) = git.upstream_tip(branch)? {
            git.delete_ref_cas(RefName::for_upstream(branch).as_str(), &tracked)?;
        }
        tracing::info!(repo = %repo.id, branch = %branch, "deleted upstream");
        Ok(())
    }
}
