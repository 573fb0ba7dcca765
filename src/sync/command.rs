//! sync::command
//!
//! Running the `git` binary against a bare repository.
//!
//! Shared by the upstream client (fetch/push) and the smart-HTTP server
//! (receive-pack/upload-pack). Children are killed if the awaiting future is
//! dropped, so a timed-out or cancelled request never leaves a git process
//! holding repository files.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Failure to run a git subprocess to completion.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to run git: {0}")]
    Io(#[from] io::Error),

    #[error("git {operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
}

/// A `git` command rooted at `git_dir`, with prompts disabled.
pub fn git_command(git_dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("--git-dir")
        .arg(git_dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Add one `-c key=value` setting through the environment so secrets stay
/// out of the process argument list.
///
/// `index` must be unique per command, starting at 0.
pub fn config_env(cmd: &mut Command, index: usize, key: &str, value: impl AsRef<OsStr>) {
    cmd.env("GIT_CONFIG_COUNT", (index + 1).to_string())
        .env(format!("GIT_CONFIG_KEY_{index}"), key)
        .env(format!("GIT_CONFIG_VALUE_{index}"), value);
}

/// Run `cmd`, optionally feeding `input` on stdin, and collect its output.
///
/// A non-zero exit status is not an error here; callers decide what it means.
pub async fn run(
    mut cmd: Command,
    operation: &str,
    input: Option<&[u8]>,
    timeout: Option<Duration>,
) -> Result<Output, CommandError> {
    if input.is_some() {
        cmd.stdin(Stdio::piped());
    }
    let mut child = cmd.spawn()?;
    let stdin = child.stdin.take();

    // Feed stdin while draining stdout/stderr so neither pipe can fill up.
    let feed = async move {
        if let (Some(bytes), Some(mut stdin)) = (input, stdin) {
            // receive-pack may exit early (hook rejection) and close its stdin.
            match stdin.write_all(bytes).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    };
    let work = async move {
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed?;
        output
    };

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(CommandError::Timeout {
                operation: operation.to_string(),
                secs: limit.as_secs(),
            }),
        },
        None => Ok(work.await?),
    }
}

/// Trimmed stderr for error messages.
pub fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_and_status() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut cmd = git_command(temp.path());
        cmd.arg("--version");
        let output = run(cmd, "version", None, Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).starts_with("git version"));
    }

    #[tokio::test]
    async fn failure_is_reported_in_status() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut cmd = git_command(&temp.path().join("missing.git"));
        cmd.args(["rev-parse", "HEAD"]);
        let output = run(cmd, "rev-parse", None, None).await.unwrap();
        assert!(!output.status.success());
        assert!(!stderr_text(&output).is_empty());
    }
}
