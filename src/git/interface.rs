//! git::interface
//!
//! Git interface implementation using git2.
//!
//! This module is the **single doorway** to local repository state. The
//! gateway only ever hosts bare repositories, so [`Git::open_bare`] refuses
//! anything with a working directory.
//!
//! # Error Handling
//!
//! Git errors are categorized into typed variants:
//! - [`GitError::NotARepo`]: Path is not a repository
//! - [`GitError::NotBare`]: Repository has a working directory
//! - [`GitError::RefNotFound`]: Requested ref does not exist
//! - [`GitError::CasFailed`]: Compare-and-swap precondition failed
//!
//! # Example
//!
//! ```ignore
//! use mirrorgate::git::Git;
//! use std::path::Path;
//!
//! let git = Git::open_bare(Path::new("/srv/repos/app.git"))?;
//! let before = git.branch_snapshot()?;
//! // ... receive-pack runs ...
//! let after = git.branch_snapshot()?;
//! for change in before.diff(&after) {
//!     println!("{} {:?} -> {:?}", change.branch, change.before, change.after);
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::{BranchName, Oid, RefName, TypeError};

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Path is not a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was opened
        path: PathBuf,
    },

    /// Repository has a working directory; only bare repositories are hosted.
    #[error("repository is not bare: {path}")]
    NotBare {
        /// The path that was opened
        path: PathBuf,
    },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound {
        /// The ref that was not found
        refname: String,
    },

    /// Compare-and-swap precondition failed.
    ///
    /// The ref moved between the snapshot and the update; the update is
    /// not applied.
    #[error("CAS failed for {refname}: expected {expected}, found {actual}")]
    CasFailed {
        /// The ref being updated
        refname: String,
        /// The expected old value
        expected: String,
        /// The actual current value
        actual: String,
    },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound {
        /// The OID that was not found
        oid: String,
    },

    /// Invalid object id format.
    #[error("invalid object id: {oid}")]
    InvalidOid {
        /// The invalid OID string
        oid: String,
    },

    /// Invalid ref name format.
    #[error("invalid ref name: {message}")]
    InvalidRefName {
        /// Description of the problem
        message: String,
    },

    /// Permission or filesystem error.
    #[error("repository access error: {message}")]
    AccessError {
        /// Description of the error
        message: String,
    },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound if context.starts_with("refs/") => GitError::RefNotFound {
                refname: context.to_string(),
            },
            git2::ErrorCode::NotFound => GitError::ObjectNotFound {
                oid: context.to_string(),
            },
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: context.to_string(),
            },
            git2::ErrorCode::Locked => GitError::AccessError {
                message: format!("{context} is locked: {}", err.message()),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }

    fn internal(err: git2::Error) -> Self {
        GitError::Internal {
            message: err.message().to_string(),
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidOid(msg) => GitError::InvalidOid { oid: msg },
            TypeError::InvalidRefName(msg)
            | TypeError::InvalidBranchName(msg)
            | TypeError::InvalidRepoId(msg) => GitError::InvalidRefName { message: msg },
        }
    }
}

// =============================================================================
// Branch Snapshots
// =============================================================================

/// Point-in-time `branch -> tip` mapping of one repository.
///
/// Captured immediately before and after receive-pack; never persisted.
/// Every ref under `refs/heads/` is recorded. Names git accepts but
/// [`BranchName`] rejects (a leading `-`, non-UTF-8 bytes) are kept apart
/// by full ref name so a diff still sees them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSnapshot {
    tips: BTreeMap<BranchName, Oid>,
    stray: BTreeMap<String, Oid>,
}

/// A `refs/heads/` ref with an unrepresentable branch name that differs
/// between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrayChange {
    /// Full ref name; lossy if the name is not UTF-8.
    pub refname: String,
    pub before: Option<Oid>,
    pub after: Option<Oid>,
}

/// One branch whose tip differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchChange {
    pub branch: BranchName,
    /// Tip in the earlier snapshot; `None` if the branch is new.
    pub before: Option<Oid>,
    /// Tip in the later snapshot; `None` if the branch was deleted.
    pub after: Option<Oid>,
}

impl BranchChange {
    pub fn is_creation(&self) -> bool {
        self.before.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.after.is_none()
    }
}

impl BranchSnapshot {
    pub fn from_tips(tips: impl IntoIterator<Item = (BranchName, Oid)>) -> Self {
        Self {
            tips: tips.into_iter().collect(),
            stray: BTreeMap::new(),
        }
    }

    pub fn get(&self, branch: &BranchName) -> Option<&Oid> {
        self.tips.get(branch)
    }

    pub fn branches(&self) -> impl Iterator<Item = &BranchName> {
        self.tips.keys()
    }

    pub fn len(&self) -> usize {
        self.tips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tips.is_empty()
    }

    /// Branches that are new, moved, or gone in `after`, in name order.
    pub fn diff(&self, after: &BranchSnapshot) -> Vec<BranchChange> {
        let mut changes = Vec::new();
        for (branch, new_tip) in &after.tips {
            match self.tips.get(branch) {
                Some(old_tip) if old_tip == new_tip => {}
                old_tip => changes.push(BranchChange {
                    branch: branch.clone(),
                    before: old_tip.cloned(),
                    after: Some(new_tip.clone()),
                }),
            }
        }
        for (branch, old_tip) in &self.tips {
            if !after.tips.contains_key(branch) {
                changes.push(BranchChange {
                    branch: branch.clone(),
                    before: Some(old_tip.clone()),
                    after: None,
                });
            }
        }
        changes.sort_by(|a, b| a.branch.cmp(&b.branch));
        changes
    }

    /// Unrepresentable refs that are new, moved, or gone in `after`.
    pub fn stray_diff(&self, after: &BranchSnapshot) -> Vec<StrayChange> {
        let names: std::collections::BTreeSet<&String> =
            self.stray.keys().chain(after.stray.keys()).collect();
        names
            .into_iter()
            .filter_map(|name| {
                let before = self.stray.get(name);
                let now = after.stray.get(name);
                (before != now).then(|| StrayChange {
                    refname: name.clone(),
                    before: before.cloned(),
                    after: now.cloned(),
                })
            })
            .collect()
    }
}

// =============================================================================
// Git
// =============================================================================

/// Handle to one bare repository.
pub struct Git {
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl Git {
    // =========================================================================
    // Opening and Creation
    // =========================================================================

    /// Open an existing bare repository at exactly `path` (no discovery).
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if `path` is not a repository
    /// - [`GitError::NotBare`] if the repository has a working directory
    pub fn open_bare(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::open(path).map_err(|_| GitError::NotARepo {
            path: path.to_path_buf(),
        })?;
        if !repo.is_bare() {
            return Err(GitError::NotBare {
                path: path.to_path_buf(),
            });
        }
        Ok(Self { repo })
    }

    /// Create a bare repository whose `HEAD` points at `default_branch`.
    ///
    /// Re-initialising an existing repository is harmless and keeps its refs.
    pub fn init_bare(path: &Path, default_branch: &BranchName) -> Result<Self, GitError> {
        let mut opts = git2::RepositoryInitOptions::new();
        opts.bare(true)
            .mkpath(true)
            .initial_head(default_branch.as_str());
        let repo = git2::Repository::init_opts(path, &opts).map_err(|e| GitError::AccessError {
            message: format!("cannot init {}: {}", path.display(), e.message()),
        })?;
        Ok(Self { repo })
    }

    /// Path of the repository directory.
    pub fn path(&self) -> &Path {
        self.repo.path()
    }

    // =========================================================================
    // Ref Resolution
    // =========================================================================

    /// Resolve a ref to the commit it points at, or `None` if it doesn't exist.
    pub fn try_resolve_ref(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        let reference = match self.repo.find_reference(refname) {
            Ok(r) => r,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(GitError::from_git2(e, refname)),
        };
        let commit = reference
            .peel_to_commit()
            .map_err(|e| GitError::from_git2(e, refname))?;
        Ok(Some(Oid::new(commit.id().to_string())?))
    }

    /// Tip of a local branch.
    pub fn branch_tip(&self, branch: &BranchName) -> Result<Option<Oid>, GitError> {
        self.try_resolve_ref(RefName::for_branch(branch).as_str())
    }

    /// Tip of a branch's upstream-tracking ref (`refs/remotes/origin/<branch>`).
    pub fn upstream_tip(&self, branch: &BranchName) -> Result<Option<Oid>, GitError> {
        self.try_resolve_ref(RefName::for_upstream(branch).as_str())
    }

    // =========================================================================
    // Branch Enumeration
    // =========================================================================

    /// List all local branches. Names git accepts but we cannot represent are skipped.
    pub fn list_branches(&self) -> Result<Vec<BranchName>, GitError> {
        let branches = self
            .repo
            .branches(Some(git2::BranchType::Local))
            .map_err(GitError::internal)?;

        let mut names = Vec::new();
        for branch in branches {
            let (branch, _) = branch.map_err(GitError::internal)?;
            if let Some(name) = branch.name().ok().flatten() {
                if let Ok(name) = BranchName::new(name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Capture every ref under `refs/heads/`.
    pub fn branch_snapshot(&self) -> Result<BranchSnapshot, GitError> {
        let mut snapshot = BranchSnapshot::default();
        let references = self
            .repo
            .references_glob("refs/heads/*")
            .map_err(GitError::internal)?;
        for reference in references {
            let reference = reference.map_err(GitError::internal)?;
            let refname = String::from_utf8_lossy(reference.name_bytes()).into_owned();
            let Some(target) = reference
                .resolve()
                .map_err(|e| GitError::from_git2(e, &refname))?
                .target()
            else {
                continue;
            };
            let tip = Oid::new(target.to_string())?;
            let branch = reference
                .name()
                .and_then(|name| name.strip_prefix("refs/heads/"))
                .and_then(|name| BranchName::new(name).ok());
            match branch {
                Some(branch) => {
                    snapshot.tips.insert(branch, tip);
                }
                None => {
                    snapshot.stray.insert(refname, tip);
                }
            }
        }
        Ok(snapshot)
    }

    // =========================================================================
    // CAS Ref Operations
    // =========================================================================

    /// Point a ref at `new_oid` if its current value matches `expected_old`.
    ///
    /// `expected_old == None` means the ref must not exist.
    ///
    /// # Errors
    ///
    /// - [`GitError::CasFailed`] if the current value doesn't match expected
    pub fn update_ref_cas(
        &self,
        refname: &str,
        new_oid: &Oid,
        expected_old: Option<&Oid>,
        message: &str,
    ) -> Result<(), GitError> {
        let current = self.try_resolve_ref_raw(refname)?;
        check_cas(refname, expected_old, current.as_deref())?;

        let oid = git2::Oid::from_str(new_oid.as_str())
            .map_err(|e| GitError::from_git2(e, new_oid.as_str()))?;
        self.repo
            .reference(refname, oid, true, message)
            .map_err(|e| GitError::from_git2(e, refname))?;
        Ok(())
    }

    /// Delete a ref if its current value matches `expected_old`.
    ///
    /// # Errors
    ///
    /// - [`GitError::RefNotFound`] if the ref doesn't exist
    /// - [`GitError::CasFailed`] if the current value doesn't match expected
    pub fn delete_ref_cas(&self, refname: &str, expected_old: &Oid) -> Result<(), GitError> {
        match self.try_resolve_ref_raw(refname)? {
            None => {
                return Err(GitError::RefNotFound {
                    refname: refname.to_string(),
                })
            }
            Some(actual) => check_cas(refname, Some(expected_old), Some(&actual))?,
        }

        let mut reference = self
            .repo
            .find_reference(refname)
            .map_err(|e| GitError::from_git2(e, refname))?;
        reference
            .delete()
            .map_err(|e| GitError::from_git2(e, refname))?;
        Ok(())
    }

    /// Point a ref at `new_oid` unconditionally.
    ///
    /// Only used for upstream-tracking refs, which record what the remote
    /// accepted rather than local history.
    pub fn force_ref(&self, refname: &str, new_oid: &Oid, message: &str) -> Result<(), GitError> {
        let oid = git2::Oid::from_str(new_oid.as_str())
            .map_err(|e| GitError::from_git2(e, new_oid.as_str()))?;
        self.repo
            .reference(refname, oid, true, message)
            .map_err(|e| GitError::from_git2(e, refname))?;
        Ok(())
    }

    fn try_resolve_ref_raw(&self, refname: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_reference(refname) {
            Ok(reference) => {
                let resolved = reference.resolve().map_err(|e| GitError::from_git2(e, refname))?;
                let oid = resolved.target().ok_or_else(|| GitError::Internal {
                    message: format!("ref {} has no target", refname),
                })?;
                Ok(Some(oid.to_string()))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, refname)),
        }
    }

    // =========================================================================
    // History Queries
    // =========================================================================

    /// Count commits reachable from `tip` but not from `base`.
    pub fn commit_count(&self, base: &Oid, tip: &Oid) -> Result<usize, GitError> {
        let base_oid = git2::Oid::from_str(base.as_str())
            .map_err(|e| GitError::from_git2(e, base.as_str()))?;
        let tip_oid =
            git2::Oid::from_str(tip.as_str()).map_err(|e| GitError::from_git2(e, tip.as_str()))?;

        let mut revwalk = self.repo.revwalk().map_err(GitError::internal)?;
        revwalk.push(tip_oid).map_err(GitError::internal)?;
        revwalk.hide(base_oid).map_err(GitError::internal)?;

        let mut count = 0;
        for oid in revwalk {
            oid.map_err(GitError::internal)?;
            count += 1;
        }
        Ok(count)
    }

    // =========================================================================
    // Remote Configuration
    // =========================================================================

    /// Get the URL for a remote, or `None` if the remote doesn't exist.
    pub fn remote_url(&self, name: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_remote(name) {
            Ok(remote) => Ok(remote.url().map(String::from)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::internal(e)),
        }
    }

    /// Make `origin` point at `url`, creating it if needed.
    ///
    /// The fetch refspec maintains `refs/remotes/origin/*` so a successful
    /// `git push origin` keeps the tracking refs current.
    pub fn ensure_origin(&self, url: &str) -> Result<(), GitError> {
        match self.remote_url("origin")? {
            Some(existing) if existing == url => Ok(()),
            Some(_) => self
                .repo
                .remote_set_url("origin", url)
                .map_err(GitError::internal),
            None => self
                .repo
                .remote_with_fetch("origin", url, "+refs/heads/*:refs/remotes/origin/*")
                .map(|_| ())
                .map_err(GitError::internal),
        }
    }

    /// Parse a remote URL into owner/repo for GitHub.
    ///
    /// ```
    /// use mirrorgate::git::Git;
    ///
    /// assert_eq!(
    ///     Git::parse_github_remote("https://github.com/acme/app.git"),
    ///     Some(("acme".to_string(), "app".to_string()))
    /// );
    /// assert_eq!(
    ///     Git::parse_github_remote("git@github.com:acme/app"),
    ///     Some(("acme".to_string(), "app".to_string()))
    /// );
    /// assert_eq!(Git::parse_github_remote("https://gitlab.com/acme/app.git"), None);
    /// ```
    pub fn parse_github_remote(url: &str) -> Option<(String, String)> {
        let rest = url
            .strip_prefix("https://github.com/")
            .or_else(|| url.strip_prefix("git@github.com:"))?;
        let rest = rest.strip_suffix(".git").unwrap_or(rest);
        let (owner, repo) = rest.split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some((owner.to_string(), repo.to_string()))
    }
}

fn check_cas(refname: &str, expected: Option<&Oid>, actual: Option<&str>) -> Result<(), GitError> {
    let matches = match (expected, actual) {
        (Some(expected), Some(actual)) => expected.as_str() == actual,
        (None, None) => true,
        _ => false,
    };
    if matches {
        return Ok(());
    }
    Err(GitError::CasFailed {
        refname: refname.to_string(),
        expected: expected.map_or_else(|| "<none>".to_string(), |o| o.to_string()),
        actual: actual.unwrap_or("<none>").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(c: char) -> Oid {
        Oid::new(c.to_string().repeat(40)).unwrap()
    }

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    mod snapshot_diff {
        use super::*;

        #[test]
        fn identical_snapshots_have_no_changes() {
            let s = BranchSnapshot::from_tips([(branch("main"), oid('a'))]);
            assert!(s.diff(&s.clone()).is_empty());
        }

        #[test]
        fn detects_moved_new_and_deleted() {
            let before = BranchSnapshot::from_tips([
                (branch("main"), oid('a')),
                (branch("old"), oid('b')),
                (branch("steady"), oid('c')),
            ]);
            let after = BranchSnapshot::from_tips([
                (branch("main"), oid('d')),
                (branch("new"), oid('e')),
                (branch("steady"), oid('c')),
            ]);

            let changes = before.diff(&after);
            let names: Vec<&str> = changes.iter().map(|c| c.branch.as_str()).collect();
            assert_eq!(names, vec!["main", "new", "old"]);

            assert_eq!(changes[0].before, Some(oid('a')));
            assert_eq!(changes[0].after, Some(oid('d')));
            assert!(changes[1].is_creation());
            assert!(changes[2].is_deletion());
        }
    }

    mod snapshot {
        use super::*;
        use tempfile::TempDir;

        fn seeded() -> (TempDir, Git, git2::Oid) {
            let dir = TempDir::new().unwrap();
            let git = Git::init_bare(&dir.path().join("r.git"), &branch("main")).unwrap();
            let commit = {
                let tree_id = git.repo.treebuilder(None).unwrap().write().unwrap();
                let tree = git.repo.find_tree(tree_id).unwrap();
                let sig = git2::Signature::now("t", "t@example.com").unwrap();
                git.repo
                    .commit(Some("refs/heads/main"), &sig, &sig, "init", &tree, &[])
                    .unwrap()
            };
            (dir, git, commit)
        }

        #[test]
        fn keeps_names_branch_validation_rejects() {
            let (_dir, git, commit) = seeded();
            let before = git.branch_snapshot().unwrap();
            git.repo
                .reference("refs/heads/-evil", commit, false, "test")
                .unwrap();
            let after = git.branch_snapshot().unwrap();

            assert_eq!(after.len(), 1, "only main is a representable branch");
            assert!(before.diff(&after).is_empty());
            let stray = before.stray_diff(&after);
            assert_eq!(stray.len(), 1);
            assert_eq!(stray[0].refname, "refs/heads/-evil");
            assert_eq!(stray[0].before, None);
            assert_eq!(stray[0].after, Some(Oid::new(commit.to_string()).unwrap()));
        }

        #[test]
        fn representable_branches_are_typed() {
            let (_dir, git, commit) = seeded();
            git.repo
                .reference("refs/heads/feature/T1", commit, false, "test")
                .unwrap();
            let snapshot = git.branch_snapshot().unwrap();

            let names: Vec<&str> = snapshot.branches().map(BranchName::as_str).collect();
            assert_eq!(names, vec!["feature/T1", "main"]);
            assert!(BranchSnapshot::default().stray_diff(&snapshot).is_empty());
        }
    }

    mod cas {
        use super::*;

        #[test]
        fn matching_values_pass() {
            assert!(check_cas("refs/heads/x", Some(&oid('a')), Some(oid('a').as_str())).is_ok());
            assert!(check_cas("refs/heads/x", None, None).is_ok());
        }

        #[test]
        fn mismatches_fail() {
            let err = check_cas("refs/heads/x", Some(&oid('a')), Some(oid('b').as_str())).unwrap_err();
            assert!(err.to_string().contains("CAS failed"));
            assert!(check_cas("refs/heads/x", None, Some(oid('b').as_str())).is_err());
            assert!(check_cas("refs/heads/x", Some(&oid('a')), None).is_err());
        }
    }

    mod github_remote {
        use super::*;

        #[test]
        fn rejects_nested_paths() {
            assert_eq!(Git::parse_github_remote("https://github.com/a/b/c.git"), None);
            assert_eq!(Git::parse_github_remote("https://github.com/a"), None);
        }
    }
}
