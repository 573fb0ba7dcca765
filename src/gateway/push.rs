//! gateway::push
//!
//! The receive-pack path as an explicit state machine.
//!
//! ```text
//! Authenticating -> Authorizing -> Locking -> Accepting -> Checking
//!     Checking -> Done(Unchanged)
//!     Checking -> RollingBack -> Done(RolledBack)
//!     Checking -> PushingUpstream -> FollowUp -> Done(Accepted)
//!                 PushingUpstream -> RollingBack -> Done(RolledBack)
//!     Checking -> FollowUp -> Done(Accepted)           (not mirrored)
//! ```
//!
//! The lock guard is acquired in `Locking` and carried by every state up to
//! `FollowUp`, which releases it before spawning PR follow-ups. An early
//! return drops the current state and the guard with it.

use std::fmt;
use std::sync::Arc;

use super::{Access, Gateway, GatewayError};
use crate::auth::resolve;
use crate::core::ops::{rollback_changes, rollback_stray, RepoLockGuard, RollbackResult};
use crate::core::types::{BranchName, Credential, Repository, Restriction};
use crate::git::{BranchChange, BranchSnapshot, Git, StrayChange};
use crate::protocol::{parse_push_commands, PushCommand};

/// One receive-pack request.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// The presented secret, if any.
    pub secret: Option<String>,
    /// Repository id from the URL.
    pub repo: String,
    /// The raw receive-pack request body.
    pub body: Vec<u8>,
}

/// Why accepted updates were undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A restricted credential updated a branch other than its own.
    OutsideAssignedBranch {
        branch: BranchName,
        allowed: BranchName,
    },
    /// Propagating an accepted branch to origin failed.
    ///
    /// Every touched branch is restored to its pre-image, then the mirror is
    /// force-synced. A branch that reached origin before the failure
    /// therefore ends at its new upstream tip, not its pre-image: matching
    /// upstream outside the lock takes precedence over undoing the push.
    UpstreamPushFailed { branch: BranchName, message: String },
    /// A ref under `refs/heads/` that is not a valid branch name changed.
    UnrepresentableRef { refname: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::OutsideAssignedBranch { branch, allowed } => {
                write!(f, "branch '{branch}' is outside the assigned branch '{allowed}'")
            }
            RejectReason::UpstreamPushFailed { branch, message } => {
                write!(f, "upstream push of '{branch}' failed: {message}")
            }
            RejectReason::UnrepresentableRef { refname } => {
                write!(f, "'{refname}' is not a valid branch name")
            }
        }
    }
}

/// What a push finally did to the repository.
#[derive(Debug)]
pub enum PushOutcome {
    /// Nothing changed (everything rejected by the hook, or a no-op push).
    Unchanged,
    /// The updates stand, and mirrors have them upstream.
    Accepted { branches: Vec<BranchName> },
    /// The updates were undone after receive-pack reported success.
    RolledBack {
        reason: RejectReason,
        result: RollbackResult,
    },
}

/// The engine's response plus the final outcome.
#[derive(Debug)]
pub struct PushReport {
    /// receive-pack's report, returned to the client verbatim.
    pub response: Vec<u8>,
    pub outcome: PushOutcome,
}

struct PushContext {
    credential: Credential,
    repo: Repository,
    restriction: Restriction,
    commands: Vec<PushCommand>,
    /// Unrepresentable refs this push changed; undone with the branches.
    stray: Vec<StrayChange>,
}

enum PushState {
    Authenticating,
    Authorizing(Credential, Repository),
    Locking(PushContext),
    Accepting(PushContext, RepoLockGuard, BranchSnapshot),
    Checking(PushContext, RepoLockGuard, BranchSnapshot),
    PushingUpstream(PushContext, RepoLockGuard, Vec<BranchChange>),
    RollingBack(PushContext, RepoLockGuard, Vec<BranchChange>, RejectReason),
    FollowUp(PushContext, RepoLockGuard, Vec<BranchChange>),
    Done(PushOutcome),
}

impl PushState {
    fn name(&self) -> &'static str {
        match self {
            PushState::Authenticating => "authenticating",
            PushState::Authorizing(..) => "authorizing",
            PushState::Locking(..) => "locking",
            PushState::Accepting(..) => "accepting",
            PushState::Checking(..) => "checking",
            PushState::PushingUpstream(..) => "pushing-upstream",
            PushState::RollingBack(..) => "rolling-back",
            PushState::FollowUp(..) => "follow-up",
            PushState::Done(..) => "done",
        }
    }
}

impl Gateway {
    /// Handle one receive-pack request end to end.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` / `Forbidden` / `Denied` before anything runs
    /// - `UpstreamUnavailable` if a mirror cannot be aligned first
    /// - `Protocol` for a malformed command list
    /// - `InvalidBranch` for an update to `refs/heads/<name>` where `<name>`
    ///   is not a valid branch name
    /// - `Engine` if receive-pack itself fails (after undoing any updates)
    ///
    /// Restriction violations and upstream push failures are not errors:
    /// receive-pack has already answered the client, so they are reported
    /// as [`PushOutcome::RolledBack`].
    #[tracing::instrument(skip_all, fields(repo = %request.repo, op = %uuid::Uuid::new_v4()))]
    pub async fn push(self: &Arc<Self>, request: PushRequest) -> Result<PushReport, GatewayError> {
        let PushRequest { secret, repo, body } = request;
        let mut response = Vec::new();
        let mut state = PushState::Authenticating;

        loop {
            tracing::trace!(state = state.name());
            state = match state {
                PushState::Authenticating => {
                    let credential = self.authenticate(secret.as_deref()).await?;
                    PushState::Authorizing(credential, self.repository(&repo)?)
                }

                PushState::Authorizing(credential, repo) => {
                    self.authorize(&credential, &repo, Access::Write).await?;
                    let restriction = match resolve(&credential) {
                        Restriction::Denied(reason) => {
                            tracing::info!(subject = credential.subject(), %reason, "push denied");
                            return Err(GatewayError::Denied(reason));
                        }
                        restriction => restriction,
                    };
                    let commands = parse_push_commands(&body)?;
                    refuse_unrepresentable(&commands)?;
                    PushState::Locking(PushContext {
                        credential,
                        repo,
                        restriction,
                        commands,
                        stray: Vec::new(),
                    })
                }

                PushState::Locking(ctx) => {
                    let held = self.locks.acquire(&ctx.repo.id).await?;
                    if ctx.repo.is_mirrored() {
                        self.sync
                            .sync_all_branches(&held, &ctx.repo, true)
                            .await
                            .map_err(|source| {
                                tracing::warn!(error = %source, "pre-push sync failed; refusing push");
                                GatewayError::UpstreamUnavailable {
                                    repo: ctx.repo.id.clone(),
                                    source,
                                }
                            })?;
                    }
                    let before = Git::open_bare(&ctx.repo.path)?.branch_snapshot()?;
                    PushState::Accepting(ctx, held, before)
                }

                PushState::Accepting(ctx, held, before) => {
                    let allowed = match &ctx.restriction {
                        Restriction::RestrictedTo(branch) if self.options.early_restriction_check => {
                            Some(branch)
                        }
                        _ => None,
                    };
                    tracing::debug!(
                        subject = ctx.credential.subject(),
                        commands = ctx.commands.len(),
                        "running receive-pack"
                    );
                    match self.engine.receive_pack(&ctx.repo.path, &body, allowed).await {
                        Ok(output) => {
                            response = output;
                            PushState::Checking(ctx, held, before)
                        }
                        Err(e) => {
                            let git = Git::open_bare(&ctx.repo.path)?;
                            let after = git.branch_snapshot()?;
                            let changes = before.diff(&after);
                            let stray = before.stray_diff(&after);
                            if !changes.is_empty() || !stray.is_empty() {
                                let mut result = rollback_changes(&git, &changes);
                                rollback_stray(&git, &stray, &mut result);
                                tracing::warn!(
                                    error = %e,
                                    outcome = %result.summary(),
                                    "receive-pack failed after updating refs"
                                );
                            }
                            return Err(e.into());
                        }
                    }
                }

                PushState::Checking(mut ctx, held, before) => {
                    let after = Git::open_bare(&ctx.repo.path)?.branch_snapshot()?;
                    self.registry.refresh_branches(&ctx.repo.id, &after);
                    let changes = before.diff(&after);
                    ctx.stray = before.stray_diff(&after);
                    let outside = match (&ctx.restriction, ctx.stray.first()) {
                        (_, Some(stray)) => Some(RejectReason::UnrepresentableRef {
                            refname: stray.refname.clone(),
                        }),
                        (Restriction::RestrictedTo(allowed), None) => changes
                            .iter()
                            .find(|c| c.branch != *allowed)
                            .map(|c| RejectReason::OutsideAssignedBranch {
                                branch: c.branch.clone(),
                                allowed: allowed.clone(),
                            }),
                        _ => None,
                    };
                    match outside {
                        None if changes.is_empty() => PushState::Done(PushOutcome::Unchanged),
                        Some(reason) => PushState::RollingBack(ctx, held, changes, reason),
                        None if ctx.repo.is_mirrored() => {
                            PushState::PushingUpstream(ctx, held, changes)
                        }
                        None => PushState::FollowUp(ctx, held, changes),
                    }
                }

                PushState::PushingUpstream(ctx, held, changes) => {
                    let mut failure = None;
                    for change in &changes {
                        let pushed = if change.is_deletion() {
                            self.sync.delete_branch(&held, &ctx.repo, &change.branch).await
                        } else {
                            self.sync.push_branch(&held, &ctx.repo, &change.branch).await
                        };
                        if let Err(e) = pushed {
                            tracing::error!(branch = %change.branch, error = %e, "upstream push failed");
                            failure = Some(RejectReason::UpstreamPushFailed {
                                branch: change.branch.clone(),
                                message: e.to_string(),
                            });
                            break;
                        }
                    }
                    match failure {
                        Some(reason) => PushState::RollingBack(ctx, held, changes, reason),
                        None => PushState::FollowUp(ctx, held, changes),
                    }
                }

                PushState::RollingBack(ctx, held, changes, reason) => {
                    let git = Git::open_bare(&ctx.repo.path)?;
                    let mut result = rollback_changes(&git, &changes);
                    rollback_stray(&git, &ctx.stray, &mut result);
                    tracing::warn!(
                        subject = ctx.credential.subject(),
                        %reason,
                        outcome = %result.summary(),
                        "push rolled back"
                    );
                    if ctx.repo.is_mirrored()
                        && matches!(reason, RejectReason::UpstreamPushFailed { .. })
                    {
                        // Branches pushed before the failure now differ from
                        // the restored local tips.
                        if let Err(e) = self.sync.sync_all_branches(&held, &ctx.repo, true).await {
                            tracing::warn!(error = %e, "re-sync after failed upstream push failed");
                        }
                    }
                    self.registry
                        .refresh_branches(&ctx.repo.id, &git.branch_snapshot()?);
                    held.release();
                    PushState::Done(PushOutcome::RolledBack { reason, result })
                }

                PushState::FollowUp(ctx, held, changes) => {
                    held.release();
                    let branches: Vec<BranchName> =
                        changes.iter().map(|c| c.branch.clone()).collect();
                    tracing::info!(
                        subject = ctx.credential.subject(),
                        branches = ?branches,
                        "push accepted"
                    );
                    if ctx.repo.is_mirrored() {
                        let live = changes
                            .into_iter()
                            .filter(|c| !c.is_deletion())
                            .map(|c| c.branch)
                            .collect();
                        self.spawn_followups(&ctx.repo, live);
                    }
                    PushState::Done(PushOutcome::Accepted { branches })
                }

                PushState::Done(outcome) => {
                    return Ok(PushReport { response, outcome });
                }
            };
        }
    }
}

/// Refuse updates to `refs/heads/` names that are not valid branch names.
///
/// Such refs cannot be confined, propagated, or rolled back by branch, so
/// receive-pack never sees them.
fn refuse_unrepresentable(commands: &[PushCommand]) -> Result<(), GatewayError> {
    for command in commands {
        if let Some(name) = command.refname.strip_prefix("refs/heads/") {
            if let Err(e) = BranchName::new(name) {
                return Err(GatewayError::InvalidBranch {
                    refname: command.refname.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(())
}
