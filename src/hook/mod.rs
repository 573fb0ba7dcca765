//! hook
//!
//! The pre-receive hook installed into every hosted repository.
//!
//! # Behavior
//!
//! The hook runs inside `git receive-pack`, before any ref is updated, and
//! reads one `<old> <new> <ref>` line per update. For each `refs/heads/*`
//! update it:
//!
//! 1. Rejects the push if `MIRRORGATE_ALLOWED_BRANCHES` is set and the
//!    branch is not in that comma-separated list.
//! 2. Rejects deleting a protected branch.
//! 3. Rejects a protected-branch update whose old tip is not an ancestor of
//!    the new tip (`git merge-base --is-ancestor`). Creating a protected
//!    branch (old tip is the zero id) is allowed.
//!
//! Any rejection writes an explanation to stderr and exits 1, which fails
//! the whole push; git relays the text to the client as `remote rejected`.
//!
//! # Versioning
//!
//! The second line of the script is a marker:
//! `# mirrorgate pre-receive hook v<N> <fingerprint>`, where the fingerprint
//! covers the protected-branch list. [`PreReceiveHook::install`] rewrites the
//! hook only when the installed marker differs, so installing is idempotent
//! and a configuration change propagates on the next startup pass.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::types::BranchName;

/// Bumped whenever the script logic changes.
pub const HOOK_VERSION: u32 = 5;

/// Environment variable the server sets for branch-restricted credentials.
pub const ALLOWED_BRANCHES_ENV: &str = "MIRRORGATE_ALLOWED_BRANCHES";

const MARKER_PREFIX: &str = "# mirrorgate pre-receive hook v";

/// Errors from hook installation.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to write hook {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to scan repositories in {path}: {source}")]
    Scan { path: PathBuf, source: io::Error },
}

/// What [`PreReceiveHook::install`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// No hook existed.
    Installed,
    /// A hook with a different marker was replaced.
    Updated,
    /// The current hook was already present.
    Unchanged,
}

/// Counts from a bulk install pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
}

impl InstallReport {
    fn record(&mut self, outcome: InstallOutcome) {
        match outcome {
            InstallOutcome::Installed => self.installed += 1,
            InstallOutcome::Updated => self.updated += 1,
            InstallOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// A rendered pre-receive hook for one protected-branch list.
#[derive(Debug, Clone)]
pub struct PreReceiveHook {
    marker: String,
    script: String,
}

impl PreReceiveHook {
    pub fn new(protected: &[BranchName]) -> Self {
        let mut names: Vec<&str> = protected.iter().map(BranchName::as_str).collect();
        names.sort_unstable();
        names.dedup();

        let digest = Sha256::digest(names.join("\n").as_bytes());
        let fingerprint = hex::encode(digest);
        let marker = format!("{MARKER_PREFIX}{HOOK_VERSION} {}", &fingerprint[..12]);
        let script = render_script(&marker, &names);
        Self { marker, script }
    }

    /// The version line embedded in the script.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// `<repo>/hooks/pre-receive`
    pub fn path_in(repo: &Path) -> PathBuf {
        repo.join("hooks").join("pre-receive")
    }

    /// The marker line of an installed hook, if any.
    pub fn installed_marker(repo: &Path) -> Option<String> {
        let content = fs::read_to_string(Self::path_in(repo)).ok()?;
        content
            .lines()
            .find(|line| line.starts_with(MARKER_PREFIX))
            .map(str::to_string)
    }

    /// Install the hook into `repo` unless the same version is already there.
    pub fn install(&self, repo: &Path) -> Result<InstallOutcome, HookError> {
        let path = Self::path_in(repo);
        let existed = path.exists();
        if existed && Self::installed_marker(repo).as_deref() == Some(self.marker.as_str()) {
            return Ok(InstallOutcome::Unchanged);
        }

        write_executable(&path, self.script.as_bytes())
            .map_err(|source| HookError::Write { path, source })?;

        Ok(if existed {
            InstallOutcome::Updated
        } else {
            InstallOutcome::Installed
        })
    }

    /// Install or upgrade the hook in every bare repository directly under `repos_dir`.
    ///
    /// A directory counts as a repository if it contains `HEAD`. A missing
    /// `repos_dir` is an empty pass. Per-repository failures are counted and
    /// logged; they do not stop the pass.
    pub fn install_all(&self, repos_dir: &Path) -> Result<InstallReport, HookError> {
        let mut report = InstallReport::default();
        let entries = match fs::read_dir(repos_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(source) => {
                return Err(HookError::Scan {
                    path: repos_dir.to_path_buf(),
                    source,
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|source| HookError::Scan {
                path: repos_dir.to_path_buf(),
                source,
            })?;
            let repo = entry.path();
            if !repo.is_dir() || !repo.join("HEAD").is_file() {
                continue;
            }
            match self.install(&repo) {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    tracing::warn!(repo = %repo.display(), error = %err, "hook install failed");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            installed = report.installed,
            updated = report.updated,
            unchanged = report.unchanged,
            errors = report.errors,
            version = HOOK_VERSION,
            "pre-receive hooks reconciled"
        );
        Ok(report)
    }
}

/// Quote for a POSIX shell single-quoted string.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn render_script(marker: &str, protected: &[&str]) -> String {
    let protected_list = format!(" {} ", protected.join(" "));
    format!(
        r#"#!/bin/sh
{marker}
# Installed by mirrorgate. Rewritten automatically when the line above changes.

ZERO="0000000000000000000000000000000000000000"
PROTECTED={protected}
ALLOWED="${allowed_env}"

is_protected() {{
    case "$PROTECTED" in
        *" $1 "*) return 0 ;;
    esac
    return 1
}}

is_allowed() {{
    [ -z "$ALLOWED" ] && return 0
    case ",$ALLOWED," in
        *",$1,"*) return 0 ;;
    esac
    return 1
}}

while read -r oldrev newrev refname; do
    case "$refname" in
        refs/heads/*) ;;
        *) continue ;;
    esac
    branch="${{refname#refs/heads/}}"

    if ! is_allowed "$branch"; then
        echo "error: refusing to update $refname" >&2
        echo "hint: this credential may only push to: $ALLOWED" >&2
        exit 1
    fi

    if is_protected "$branch"; then
        if [ "$newrev" = "$ZERO" ]; then
            echo "error: refusing to delete protected branch '$branch'" >&2
            echo "hint: '$branch' is forward-only and cannot be deleted." >&2
            exit 1
        fi
        if [ "$oldrev" != "$ZERO" ]; then
            if ! git merge-base --is-ancestor "$oldrev" "$newrev" 2>/dev/null; then
                echo "error: refusing to force-push to protected branch '$branch'" >&2
                echo "hint: '$branch' is forward-only; $oldrev is not an ancestor of $newrev." >&2
                echo "hint: to undo changes, push a new commit that reverts them." >&2
                exit 1
            fi
        fi
    fi
done
exit 0
"#,
        marker = marker,
        protected = shell_quote(&protected_list),
        allowed_env = ALLOWED_BRANCHES_ENV,
    )
}

fn write_executable(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))?;
    }
    fs::rename(&tmp, path)
}
