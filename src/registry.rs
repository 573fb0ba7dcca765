//! registry
//!
//! In-process registry of hosted repositories.
//!
//! Each [`Repository`] lives at `<repos_dir>/<id>.git`. Opening the registry
//! from configuration creates missing bare repositories, points `origin` at
//! the configured upstream, and installs the pre-receive hook into every
//! newly created repository. Existing repositories get their hooks
//! upgraded by the startup pass in [`crate::hook`].
//!
//! The registry also caches each repository's branch set; the sync service
//! and the push path refresh it after every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use thiserror::Error;

use crate::core::config::{GatewayConfig, RepositoryEntry};
use crate::core::types::{BranchName, RepoId, Repository};
use crate::git::{BranchSnapshot, Git, GitError};
use crate::hook::{HookError, PreReceiveHook};

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("repository already exists: {0}")]
    AlreadyExists(RepoId),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Hook(#[from] HookError),
}

/// Definition of a repository to create or open.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub id: RepoId,
    pub name: String,
    pub project: String,
    pub origin: Option<String>,
    pub default_branch: BranchName,
}

impl NewRepository {
    fn from_entry(entry: &RepositoryEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone().unwrap_or_else(|| entry.id.to_string()),
            project: entry.project.clone(),
            origin: entry.origin.clone(),
            default_branch: entry
                .default_branch
                .clone()
                .unwrap_or_else(BranchName::main),
        }
    }
}

/// The set of repositories this gateway hosts.
#[derive(Debug)]
pub struct Registry {
    repos_dir: PathBuf,
    hook: PreReceiveHook,
    repos: RwLock<BTreeMap<RepoId, Repository>>,
}

impl Registry {
    /// An empty registry rooted at `repos_dir`.
    pub fn new(repos_dir: impl Into<PathBuf>, hook: PreReceiveHook) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            hook,
            repos: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open or create every configured repository.
    ///
    /// Returns the registry and the ids of repositories created by this call.
    pub fn from_config(config: &GatewayConfig) -> Result<(Self, Vec<RepoId>), RegistryError> {
        let registry = Self::new(
            config.repos_dir(),
            PreReceiveHook::new(&config.protected_branches()),
        );
        let mut created = Vec::new();
        for entry in &config.repositories {
            let wanted = NewRepository::from_entry(entry);
            if registry.path_for(&wanted.id).join("HEAD").exists() {
                registry.open_existing(wanted)?;
            } else {
                registry.create_repository(wanted)?;
                created.push(entry.id.clone());
            }
        }
        Ok((registry, created))
    }

    pub fn repos_dir(&self) -> &Path {
        &self.repos_dir
    }

    pub fn hook(&self) -> &PreReceiveHook {
        &self.hook
    }

    /// `<repos_dir>/<id>.git`
    pub fn path_for(&self, id: &RepoId) -> PathBuf {
        self.repos_dir.join(format!("{id}.git"))
    }

    /// Create a bare repository, configure its origin, and install the hook.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyExists`] if the id is registered or its
    /// directory already holds a repository.
    pub fn create_repository(&self, wanted: NewRepository) -> Result<Repository, RegistryError> {
        let path = self.path_for(&wanted.id);
        if self.get(&wanted.id).is_some() || path.join("HEAD").exists() {
            return Err(RegistryError::AlreadyExists(wanted.id));
        }
        std::fs::create_dir_all(&self.repos_dir).map_err(|source| RegistryError::Io {
            path: self.repos_dir.clone(),
            source,
        })?;

        let git = Git::init_bare(&path, &wanted.default_branch)?;
        if let Some(origin) = &wanted.origin {
            git.ensure_origin(origin)?;
        }
        self.hook.install(&path)?;
        tracing::info!(
            repo = %wanted.id,
            mirrored = wanted.origin.is_some(),
            path = %path.display(),
            "repository created"
        );

        let repo = self.insert(wanted, path, &git)?;
        Ok(repo)
    }

    fn open_existing(&self, wanted: NewRepository) -> Result<Repository, RegistryError> {
        let path = self.path_for(&wanted.id);
        let git = Git::open_bare(&path)?;
        if let Some(origin) = &wanted.origin {
            git.ensure_origin(origin)?;
        }
        self.insert(wanted, path, &git)
    }

    fn insert(&self, wanted: NewRepository, path: PathBuf, git: &Git) -> Result<Repository, RegistryError> {
        let mut repo = Repository::new(
            wanted.id,
            wanted.name,
            wanted.project,
            wanted.origin,
            path,
            wanted.default_branch,
        );
        repo.branches = git.list_branches()?.into_iter().collect();
        self.repos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo.id.clone(), repo.clone());
        Ok(repo)
    }

    /// A snapshot of one repository's entity.
    pub fn get(&self, id: &RepoId) -> Option<Repository> {
        self.repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All repositories, in id order.
    pub fn list(&self) -> Vec<Repository> {
        self.repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Repositories that mirror an origin, in id order.
    pub fn mirrored(&self) -> Vec<Repository> {
        self.list().into_iter().filter(Repository::is_mirrored).collect()
    }

    /// Record a successful upstream sync.
    pub fn mark_synced(&self, id: &RepoId) {
        if let Some(repo) = self
            .repos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
        {
            repo.last_synced = Some(Utc::now());
        }
    }

    /// Replace a repository's cached branch set.
    pub fn refresh_branches(&self, id: &RepoId, snapshot: &BranchSnapshot) {
        if let Some(repo) = self
            .repos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
        {
            repo.branches = snapshot.branches().cloned().collect();
        }
    }
}
