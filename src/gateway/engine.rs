//! gateway::engine
//!
//! The git engine behind the smart-HTTP endpoints.
//!
//! [`PackEngine`] is the seam between the gateway's orchestration and the
//! program that actually speaks the pack protocol. [`GitCliEngine`] runs
//! `git upload-pack` / `git receive-pack` in stateless-RPC mode; the
//! pre-receive hook fires inside the latter.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::BranchName;
use crate::hook::ALLOWED_BRANCHES_ENV;
use crate::protocol::GitService;
use crate::sync::command::{git_command, run, stderr_text, CommandError};

/// Failure to run a pack service.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("git {service} failed: {message}")]
    Failed { service: GitService, message: String },
}

/// Runs the pack protocol against a bare repository.
#[async_trait]
pub trait PackEngine: Send + Sync {
    /// The ref advertisement for `info/refs` (without the service banner).
    async fn advertise(&self, repo: &Path, service: GitService) -> Result<Vec<u8>, EngineError>;

    /// Serve a fetch/clone negotiation.
    async fn upload_pack(&self, repo: &Path, request: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Apply a push. `allowed`, when set, is exported to the pre-receive
    /// hook so it can refuse updates to any other branch.
    async fn receive_pack(
        &self,
        repo: &Path,
        request: &[u8],
        allowed: Option<&BranchName>,
    ) -> Result<Vec<u8>, EngineError>;
}

/// [`PackEngine`] backed by the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCliEngine {
    timeout: Option<Duration>,
}

impl GitCliEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill pack processes that run longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    async fn stateless_rpc(
        &self,
        repo: &Path,
        service: GitService,
        advertise: bool,
        input: Option<&[u8]>,
        allowed: Option<&BranchName>,
    ) -> Result<Vec<u8>, EngineError> {
        let mut cmd = git_command(repo);
        cmd.arg(service.subcommand());
        if advertise {
            cmd.arg("--advertise-refs");
        }
        cmd.arg("--stateless-rpc").arg(repo);
        if let Some(branch) = allowed {
            cmd.env(ALLOWED_BRANCHES_ENV, branch.as_str());
        }

        let output = run(cmd, service.subcommand(), input, self.timeout).await?;
        // receive-pack reports hook rejections inside its stdout report, so
        // any output at all is a protocol response worth returning.
        if output.status.success() || !output.stdout.is_empty() {
            return Ok(output.stdout);
        }
        Err(EngineError::Failed {
            service,
            message: stderr_text(&output),
        })
    }
}

#[async_trait]
impl PackEngine for GitCliEngine {
    async fn advertise(&self, repo: &Path, service: GitService) -> Result<Vec<u8>, EngineError> {
        self.stateless_rpc(repo, service, true, None, None).await
    }

    async fn upload_pack(&self, repo: &Path, request: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.stateless_rpc(repo, GitService::UploadPack, false, Some(request), None)
            .await
    }

    async fn receive_pack(
        &self,
        repo: &Path,
        request: &[u8],
        allowed: Option<&BranchName>,
    ) -> Result<Vec<u8>, EngineError> {
        self.stateless_rpc(repo, GitService::ReceivePack, false, Some(request), allowed)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Git;
    use tempfile::TempDir;

    #[tokio::test]
    async fn advertises_empty_repository() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.git");
        Git::init_bare(&path, &BranchName::main()).unwrap();

        let refs = GitCliEngine::new()
            .advertise(&path, GitService::ReceivePack)
            .await
            .unwrap();
        // An empty repository still advertises capabilities.
        assert!(String::from_utf8_lossy(&refs).contains("report-status"));
    }

    #[tokio::test]
    async fn missing_repository_fails() {
        let temp = TempDir::new().unwrap();
        let err = GitCliEngine::new()
            .advertise(&temp.path().join("missing.git"), GitService::UploadPack)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Failed { .. }));
    }
}
