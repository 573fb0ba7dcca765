//! gateway
//!
//! Orchestration of every operation that touches a hosted repository.
//!
//! # Architecture
//!
//! [`Gateway`] owns the lock manager and composes the registry, the
//! upstream sync service, the identity seams and the git engine. The HTTP
//! layer and the CLI are thin callers: each request or command maps to one
//! gateway method, and each method that mutates refs does so under the
//! repository lock.
//!
//! | Operation                         | Lock held for            |
//! |-----------------------------------|--------------------------|
//! | [`Gateway::push`]                 | sync through upstream push |
//! | [`Gateway::advertise`] (mirrored) | the pre-read sync only   |
//! | [`Gateway::sync_now`]             | the sync                 |
//! | [`Gateway::push_to_remote`]       | the push                 |
//! | ensure-PR follow-up               | branch check and PR call |
//!
//! No method calls another lock-taking method while holding the lock.

mod engine;
mod followup;
mod push;

pub use engine::{EngineError, GitCliEngine, PackEngine};
pub use followup::{FollowUpError, FollowUpOutcome};
pub use push::{PushOutcome, PushReport, PushRequest, RejectReason};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::auth::{resolve, AuthError, Authenticator, PermissionChecker, StaticAuth};
use crate::core::config::schema::DEFAULT_UPSTREAM_TIMEOUT_SECS;
use crate::core::config::GatewayConfig;
use crate::core::ops::{LockError, RepoLockManager};
use crate::core::types::{BranchName, Credential, DenyReason, RepoId, Repository, Restriction};
use crate::forge::{forge_for_origin, Forge};
use crate::git::{BranchChange, GitError};
use crate::protocol::{GitService, ProtocolError};
use crate::registry::{NewRepository, Registry, RegistryError};
use crate::sync::{GitCliUpstream, SyncError, SyncService, Upstream};

/// Errors from gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    /// The credential may not push at all.
    #[error("{0}")]
    Denied(DenyReason),

    #[error("repository not found: {0}")]
    NotFound(String),

    /// The pre-write sync failed, so the push was refused.
    #[error("could not align {repo} with upstream: {source}")]
    UpstreamUnavailable {
        repo: RepoId,
        #[source]
        source: SyncError,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A push command names a `refs/heads/` ref that is not a valid branch.
    #[error("refusing to update {refname}: {reason}")]
    InvalidBranch { refname: String, reason: String },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Level of access an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl From<GitService> for Access {
    fn from(service: GitService) -> Self {
        match service {
            GitService::UploadPack => Access::Read,
            GitService::ReceivePack => Access::Write,
        }
    }
}

/// Behavior switches.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Export the allowed branch to the pre-receive hook so out-of-branch
    /// updates are refused before they land.
    pub early_restriction_check: bool,
    /// Base branch for follow-up PRs; `None` means each repository's default.
    pub pr_base: Option<BranchName>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            early_restriction_check: true,
            pr_base: None,
        }
    }
}

#[derive(Clone)]
struct ForgeSettings {
    token: String,
    api_base: Option<String>,
}

/// The gateway. Shared as `Arc<Gateway>` by the server, the reconciler and
/// follow-up tasks.
pub struct Gateway {
    registry: Arc<Registry>,
    locks: RepoLockManager,
    sync: SyncService,
    authenticator: Arc<dyn Authenticator>,
    permissions: Arc<dyn PermissionChecker>,
    engine: Arc<dyn PackEngine>,
    forges: RwLock<HashMap<RepoId, Arc<dyn Forge>>>,
    forge_settings: Option<ForgeSettings>,
    options: GatewayOptions,
    followups: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("repositories", &self.registry.list().len())
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for [`Gateway`].
///
/// Unset seams default to the production implementations, except identity:
/// without an authenticator every request is refused.
pub struct GatewayBuilder {
    registry: Arc<Registry>,
    upstream: Option<Arc<dyn Upstream>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    permissions: Option<Arc<dyn PermissionChecker>>,
    engine: Option<Arc<dyn PackEngine>>,
    forges: HashMap<RepoId, Arc<dyn Forge>>,
    forge_settings: Option<ForgeSettings>,
    options: GatewayOptions,
}

impl GatewayBuilder {
    pub fn upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Use one object for both identity seams.
    pub fn auth<A>(mut self, auth: Arc<A>) -> Self
    where
        A: Authenticator + PermissionChecker + 'static,
    {
        self.authenticator = Some(auth.clone());
        self.permissions = Some(auth);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn PackEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Attach a forge for PR follow-ups on one repository.
    pub fn forge(mut self, repo: RepoId, forge: Arc<dyn Forge>) -> Self {
        self.forges.insert(repo, forge);
        self
    }

    pub fn options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Arc<Gateway> {
        let upstream: Arc<dyn Upstream> = match self.upstream {
            Some(upstream) => upstream,
            None => {
                let timeout = Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS);
                Arc::new(GitCliUpstream::new(None, timeout, timeout))
            }
        };
        let nobody = Arc::new(StaticAuth::default());
        let authenticator: Arc<dyn Authenticator> = match self.authenticator {
            Some(authenticator) => authenticator,
            None => nobody.clone(),
        };
        let permissions: Arc<dyn PermissionChecker> = match self.permissions {
            Some(permissions) => permissions,
            None => nobody,
        };
        let engine: Arc<dyn PackEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(GitCliEngine::new()),
        };
        let locks = RepoLockManager::with_lock_files(self.registry.repos_dir());
        Arc::new(Gateway {
            sync: SyncService::new(upstream, Arc::clone(&self.registry)),
            registry: self.registry,
            locks,
            authenticator,
            permissions,
            engine,
            forges: RwLock::new(self.forges),
            forge_settings: self.forge_settings,
            options: self.options,
            followups: Mutex::new(JoinSet::new()),
        })
    }
}

impl Gateway {
    pub fn builder(registry: Arc<Registry>) -> GatewayBuilder {
        GatewayBuilder {
            registry,
            upstream: None,
            authenticator: None,
            permissions: None,
            engine: None,
            forges: HashMap::new(),
            forge_settings: None,
            options: GatewayOptions::default(),
        }
    }

    /// Wire the production gateway from configuration.
    pub fn from_config(config: &GatewayConfig, registry: Arc<Registry>) -> Arc<Self> {
        let upstream = GitCliUpstream::new(
            config.upstream.token.clone(),
            Duration::from_secs(config.fetch_timeout_secs()),
            Duration::from_secs(config.push_timeout_secs()),
        );
        let mut builder = Self::builder(Arc::clone(&registry))
            .upstream(Arc::new(upstream))
            .auth(Arc::new(StaticAuth::from_config(config)))
            .engine(Arc::new(GitCliEngine::with_timeout(Duration::from_secs(
                config.push_timeout_secs(),
            ))))
            .options(GatewayOptions {
                early_restriction_check: config.early_restriction_check(),
                pr_base: config.forge.pr_base.clone(),
            });

        if config.forge_enabled() {
            match &config.forge.token {
                Some(token) => {
                    let settings = ForgeSettings {
                        token: token.clone(),
                        api_base: config.forge.api_base.clone(),
                    };
                    for repo in registry.mirrored() {
                        if let Some(forge) = settings.forge_for(&repo) {
                            builder = builder.forge(repo.id.clone(), forge);
                        }
                    }
                    builder.forge_settings = Some(settings);
                }
                None => tracing::warn!("forge enabled without a token; PR follow-ups are off"),
            }
        }
        builder.build()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn locks(&self) -> &RepoLockManager {
        &self.locks
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Look up a repository by its URL segment (`app` or `app.git`).
    pub fn repository(&self, id: &str) -> Result<Repository, GatewayError> {
        RepoId::new(id)
            .ok()
            .and_then(|id| self.registry.get(&id))
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    /// Map a presented secret to a credential.
    pub async fn authenticate(&self, secret: Option<&str>) -> Result<Credential, GatewayError> {
        let secret = secret.ok_or(GatewayError::Unauthenticated)?;
        self.authenticator
            .authenticate(secret)
            .await?
            .ok_or(GatewayError::Unauthenticated)
    }

    /// Check project-level access.
    pub async fn authorize(
        &self,
        credential: &Credential,
        repo: &Repository,
        access: Access,
    ) -> Result<(), GatewayError> {
        let allowed = match access {
            Access::Read => self.permissions.can_read(credential, repo).await?,
            Access::Write => self.permissions.can_write(credential, repo).await?,
        };
        if allowed {
            return Ok(());
        }
        tracing::info!(
            repo = %repo.id,
            subject = credential.subject(),
            ?access,
            "access denied"
        );
        Err(GatewayError::Forbidden(match access {
            Access::Read => format!("read access to {} denied", repo.id),
            Access::Write => format!("push access to {} denied", repo.id),
        }))
    }

    /// Access check for a smart-HTTP service.
    ///
    /// The receive-pack advertisement is refused to credentials that could
    /// never push, so git reports the reason before sending a pack.
    pub async fn authorize_service(
        &self,
        credential: &Credential,
        repo: &Repository,
        service: GitService,
    ) -> Result<(), GatewayError> {
        self.authorize(credential, repo, service.into()).await?;
        if service == GitService::ReceivePack {
            if let Restriction::Denied(reason) = resolve(credential) {
                return Err(GatewayError::Denied(reason));
            }
        }
        Ok(())
    }

    /// Branch confinement for explicit operations on one branch.
    pub fn authorize_branch(
        &self,
        credential: &Credential,
        branch: &BranchName,
    ) -> Result<(), GatewayError> {
        match resolve(credential) {
            Restriction::Denied(reason) => Err(GatewayError::Denied(reason)),
            restriction if !restriction.permits(branch) => Err(GatewayError::Forbidden(format!(
                "credential may not act on branch {branch}"
            ))),
            _ => Ok(()),
        }
    }

    /// Bring a mirror up to date before serving reads.
    ///
    /// Failure is not fatal: the caller serves the last known local state.
    async fn presync_for_read(&self, repo: &Repository) {
        if !repo.is_mirrored() {
            return;
        }
        let guard = match self.locks.acquire(&repo.id).await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(repo = %repo.id, error = %e, "cannot lock for pre-read sync; serving local state");
                return;
            }
        };
        if let Err(e) = self.sync.sync_all_branches(&guard, repo, true).await {
            tracing::warn!(repo = %repo.id, error = %e, "pre-read sync failed; serving local state");
        }
        guard.release();
    }

    /// Ref advertisement for `info/refs`.
    ///
    /// Mirrors are synced first, under the lock, for both services. The lock
    /// is released before the engine runs.
    pub async fn advertise(
        &self,
        repo: &Repository,
        service: GitService,
    ) -> Result<Vec<u8>, GatewayError> {
        self.presync_for_read(repo).await;
        Ok(self.engine.advertise(&repo.path, service).await?)
    }

    /// Serve a fetch/clone negotiation from local state.
    pub async fn upload_pack(
        &self,
        repo: &Repository,
        request: &[u8],
    ) -> Result<Vec<u8>, GatewayError> {
        Ok(self.engine.upload_pack(&repo.path, request).await?)
    }

    /// Explicit "sync now": force-sync every branch from upstream.
    pub async fn sync_now(&self, repo: &Repository) -> Result<Vec<BranchChange>, GatewayError> {
        if !repo.is_mirrored() {
            return Err(SyncError::NotMirrored {
                repo: repo.id.clone(),
            }
            .into());
        }
        let guard = self.locks.acquire(&repo.id).await?;
        let changes = self.sync.sync_all_branches(&guard, repo, true).await?;
        guard.release();
        Ok(changes)
    }

    /// Explicit "push branch to remote".
    pub async fn push_to_remote(
        &self,
        repo: &Repository,
        branch: &BranchName,
    ) -> Result<(), GatewayError> {
        let guard = self.locks.acquire(&repo.id).await?;
        let result = self.sync.push_branch(&guard, repo, branch).await;
        guard.release();
        if let Err(e) = &result {
            tracing::error!(repo = %repo.id, branch = %branch, error = %e, "push to remote failed");
        }
        Ok(result?)
    }

    /// Create a repository at runtime.
    ///
    /// Mirrors get a forge (when configured) and an initial force sync. A
    /// failed initial sync leaves the repository registered; the next read
    /// retries it.
    pub async fn create_repository(
        &self,
        wanted: NewRepository,
    ) -> Result<Repository, GatewayError> {
        let repo = self.registry.create_repository(wanted)?;
        if let Some(forge) = self
            .forge_settings
            .as_ref()
            .and_then(|settings| settings.forge_for(&repo))
        {
            self.forges
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(repo.id.clone(), forge);
        }
        self.initial_sync(std::slice::from_ref(&repo.id)).await;
        Ok(self.registry.get(&repo.id).unwrap_or(repo))
    }

    /// Force-sync freshly created mirrors.
    pub async fn initial_sync(&self, ids: &[RepoId]) {
        for id in ids {
            let Some(repo) = self.registry.get(id).filter(Repository::is_mirrored) else {
                continue;
            };
            let guard = match self.locks.acquire(id).await {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::warn!(repo = %id, error = %e, "cannot lock for initial sync");
                    continue;
                }
            };
            match self.sync.sync_all_branches(&guard, &repo, true).await {
                Ok(changes) => {
                    tracing::info!(repo = %id, branches = changes.len(), "initial sync complete")
                }
                Err(e) => tracing::warn!(repo = %id, error = %e, "initial sync failed"),
            }
        }
    }

    pub(crate) fn sync_service(&self) -> &SyncService {
        &self.sync
    }

    fn forge(&self, repo: &RepoId) -> Option<Arc<dyn Forge>> {
        self.forges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repo)
            .cloned()
    }

    /// Wait for every spawned follow-up to finish.
    pub async fn wait_for_followups(&self) {
        loop {
            let mut pending = std::mem::take(
                &mut *self
                    .followups
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "follow-up task panicked");
                }
            }
        }
    }
}

impl ForgeSettings {
    fn forge_for(&self, repo: &Repository) -> Option<Arc<dyn Forge>> {
        let origin = repo.origin.as_deref()?;
        let forge = forge_for_origin(origin, &self.token, self.api_base.as_deref());
        if forge.is_none() {
            tracing::debug!(repo = %repo.id, "origin is not on a known forge; no PR follow-ups");
        }
        forge
    }
}
