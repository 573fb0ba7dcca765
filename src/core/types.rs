//! core::types
//!
//! Strong types for the gateway's domain.
//!
//! # Types
//!
//! - [`BranchName`] - Validated Git branch name
//! - [`Oid`] - Git object identifier (SHA)
//! - [`RefName`] - Validated Git reference name
//! - [`RepoId`] - Repository identifier used in URLs and lock keys
//! - [`Repository`] - A hosted bare repository, optionally mirroring an origin
//! - [`Credential`] - An authenticated caller and its optional association
//! - [`UnitOfWork`] - Tracked effort owning at most one assigned branch
//! - [`Restriction`] - Outcome of branch authorization
//!
//! # Validation
//!
//! Git-facing types enforce validity at construction time, so an invalid
//! branch or object id never reaches a ref update.
//!
//! # Examples
//!
//! ```
//! use mirrorgate::core::types::{BranchName, Oid, RefName};
//!
//! let branch = BranchName::new("feature/T1").unwrap();
//! let refname = RefName::for_branch(&branch);
//! assert_eq!(refname.as_str(), "refs/heads/feature/T1");
//!
//! assert!(BranchName::new("bad..name").is_err());
//! assert!(Oid::new("not-a-sha").is_err());
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid repository id: {0}")]
    InvalidRepoId(String),
}

/// Characters git never allows inside a ref.
const FORBIDDEN_REF_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];

/// Shared refname checks (see `git check-ref-format`).
///
/// Returns a human-readable reason on failure; callers wrap it in the
/// variant appropriate to what they are validating.
fn check_ref_format(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("cannot be empty".into());
    }
    if name == "@" {
        return Err("cannot be '@'".into());
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err("cannot start or end with '/'".into());
    }
    for bad in ["..", "@{", "//"] {
        if name.contains(bad) {
            return Err(format!("cannot contain '{bad}'"));
        }
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_REF_CHARS.contains(c)) {
        return Err(format!("cannot contain '{c}'"));
    }
    if name.chars().any(|c| c.is_ascii_control()) {
        return Err("cannot contain control characters".into());
    }
    for component in name.split('/') {
        if component.starts_with('.') {
            return Err("path component cannot start with '.'".into());
        }
        if component.ends_with(".lock") {
            return Err("path component cannot end with '.lock'".into());
        }
    }
    Ok(())
}

/// A validated Git branch name (the part after `refs/heads/`).
///
/// # Example
///
/// ```
/// use mirrorgate::core::types::BranchName;
///
/// let name = BranchName::new("feature/T1").unwrap();
/// assert_eq!(name.as_str(), "feature/T1");
///
/// assert!(BranchName::new("").is_err());
/// assert!(BranchName::new("-rf").is_err());
/// assert!(BranchName::new("x.lock").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.starts_with('-') {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot start with '-'".into(),
            ));
        }
        check_ref_format(&name)
            .map_err(|reason| TypeError::InvalidBranchName(format!("branch name {reason}")))?;
        Ok(Self(name))
    }

    /// `main`, the default branch of newly created repositories.
    pub fn main() -> Self {
        Self("main".to_string())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A Git object identifier (SHA-1 or SHA-256), normalized to lowercase.
///
/// # Example
///
/// ```
/// use mirrorgate::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.short(7), "abc123d");
/// assert!(Oid::zero().is_zero());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// The "branch did not exist" sentinel used by receive-pack and hooks.
    pub const ZERO_SHA1: &'static str = "0000000000000000000000000000000000000000";

    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not a 40 or 64 character hex id.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid("object id must be hexadecimal".into()));
        }
        Ok(Self(oid))
    }

    /// The zero/null OID.
    pub fn zero() -> Self {
        Self(Self::ZERO_SHA1.to_string())
    }

    /// Check if this is the zero/null OID.
    pub fn is_zero(&self) -> bool {
        self.0.chars().all(|c| c == '0')
    }

    /// First `len` characters of the id (the whole id if shorter).
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated Git reference name.
///
/// # Example
///
/// ```
/// use mirrorgate::core::types::{BranchName, RefName};
///
/// let branch = BranchName::new("main").unwrap();
/// let refname = RefName::for_branch(&branch);
/// assert_eq!(refname.branch_name(), Some(branch));
/// assert_eq!(RefName::new("refs/tags/v1").unwrap().branch_name(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// Create a new validated ref name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRefName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        check_ref_format(&name)
            .map_err(|reason| TypeError::InvalidRefName(format!("ref name {reason}")))?;
        Ok(Self(name))
    }

    /// `refs/heads/<branch>`
    pub fn for_branch(branch: &BranchName) -> Self {
        Self(format!("refs/heads/{}", branch.as_str()))
    }

    /// `refs/remotes/origin/<branch>`, the upstream-tracking ref for a branch.
    pub fn for_upstream(branch: &BranchName) -> Self {
        Self(format!("refs/remotes/origin/{}", branch.as_str()))
    }

    /// Strip a prefix from the ref name and return the remainder.
    pub fn strip_prefix(&self, prefix: &str) -> Option<&str> {
        self.0.strip_prefix(prefix)
    }

    /// Check if this ref is a branch ref.
    pub fn is_branch_ref(&self) -> bool {
        self.0.starts_with("refs/heads/")
    }

    /// The branch this ref names, if it lives under `refs/heads/`.
    pub fn branch_name(&self) -> Option<BranchName> {
        self.strip_prefix("refs/heads/")
            .and_then(|name| BranchName::new(name).ok())
    }

    /// Get the ref name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a hosted repository.
///
/// Used as the first URL path segment and as the lock key, so it is
/// restricted to `[A-Za-z0-9._-]` and may not start with `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId(String);

impl RepoId {
    /// Create a validated repository id.
    ///
    /// A trailing `.git` is stripped so `/{id}.git/info/refs` and
    /// `/{id}/info/refs` address the same repository.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRepoId` for empty ids or ids with path characters.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        let id = id.strip_suffix(".git").map(str::to_string).unwrap_or(id);
        if id.is_empty() {
            return Err(TypeError::InvalidRepoId("repository id cannot be empty".into()));
        }
        if id.starts_with('.') {
            return Err(TypeError::InvalidRepoId(format!(
                "repository id cannot start with '.': {id}"
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(TypeError::InvalidRepoId(format!(
                "repository id may only contain letters, digits, '-', '_' and '.': {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RepoId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RepoId> for String {
    fn from(id: RepoId) -> Self {
        id.0
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A hosted bare repository.
///
/// `mirrored` is fixed at construction: a repository either mirrors an
/// external origin for its whole life or never does. The branch set is the
/// only part that changes, after every push and sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub id: RepoId,
    pub name: String,
    pub project: String,
    pub origin: Option<String>,
    pub path: PathBuf,
    pub default_branch: BranchName,
    pub branches: BTreeSet<BranchName>,
    /// When the last successful upstream sync finished
    pub last_synced: Option<DateTime<Utc>>,
    mirrored: bool,
}

impl Repository {
    /// Build a repository entity. It is mirrored exactly when an origin is given.
    pub fn new(
        id: RepoId,
        name: impl Into<String>,
        project: impl Into<String>,
        origin: Option<String>,
        path: PathBuf,
        default_branch: BranchName,
    ) -> Self {
        let mirrored = origin.is_some();
        Self {
            id,
            name: name.into(),
            project: project.into(),
            origin,
            path,
            default_branch,
            branches: BTreeSet::new(),
            last_synced: None,
            mirrored,
        }
    }

    /// Whether this repository mirrors an external origin.
    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }
}

/// Tracked effort that owns exactly one branch once assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    pub id: String,
    pub project: String,
    assigned_branch: Option<BranchName>,
}

impl UnitOfWork {
    /// A unit with no branch assigned yet.
    pub fn new(id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
            assigned_branch: None,
        }
    }

    /// A unit whose branch is already assigned.
    pub fn with_branch(id: impl Into<String>, project: impl Into<String>, branch: BranchName) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
            assigned_branch: Some(branch),
        }
    }

    /// Assign the unit's branch.
    ///
    /// Returns `false` and leaves the unit untouched if a branch was
    /// already assigned.
    pub fn assign_branch(&mut self, branch: BranchName) -> bool {
        if self.assigned_branch.is_some() {
            return false;
        }
        self.assigned_branch = Some(branch);
        true
    }

    pub fn assigned_branch(&self) -> Option<&BranchName> {
        self.assigned_branch.as_ref()
    }
}

/// What an agent credential is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// A live session, which may itself be working on a unit of work.
    Session {
        id: String,
        unit: Option<UnitOfWork>,
    },
    /// A unit of work directly.
    UnitOfWork(UnitOfWork),
}

impl Association {
    /// The unit of work reachable through this association.
    pub fn unit(&self) -> Option<&UnitOfWork> {
        match self {
            Association::Session { unit, .. } => unit.as_ref(),
            Association::UnitOfWork(unit) => Some(unit),
        }
    }
}

/// An authenticated caller.
///
/// With an association it is an agent credential, without one an operator
/// credential. The association is set at construction and never changes.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    subject: String,
    association: Option<Association>,
}

impl Credential {
    pub fn operator(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            association: None,
        }
    }

    pub fn agent(subject: impl Into<String>, association: Association) -> Self {
        Self {
            subject: subject.into(),
            association: Some(association),
        }
    }

    /// Stable, non-secret label for logs.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn association(&self) -> Option<&Association> {
        self.association.as_ref()
    }

    pub fn is_agent(&self) -> bool {
        self.association.is_some()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.subject)
            .field("agent", &self.is_agent())
            .finish()
    }
}

/// Why an agent credential may not push at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoUnitOfWork,
    NoBranchAssigned,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::NoUnitOfWork => "create a unit of work before pushing",
            DenyReason::NoBranchAssigned => "no branch assigned to this unit of work",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Which branches a credential may leave modified after a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    Unrestricted,
    RestrictedTo(BranchName),
    Denied(DenyReason),
}

impl Restriction {
    /// Whether a push that touched `branch` may keep that update.
    pub fn permits(&self, branch: &BranchName) -> bool {
        match self {
            Restriction::Unrestricted => true,
            Restriction::RestrictedTo(allowed) => allowed == branch,
            Restriction::Denied(_) => false,
        }
    }
}
