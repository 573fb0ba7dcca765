//! Shared fixtures for integration tests.
//!
//! Every fixture drives the real `git` binary: an upstream bare repository
//! stands in for the forge, a gateway serves a mirror of it over HTTP on an
//! ephemeral port, and working clones talk to the gateway like an agent would.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;
use std::thread::JoinHandle;

use tempfile::TempDir;
use tokio::sync::oneshot;

use mirrorgate::core::config::GatewayConfig;
use mirrorgate::gateway::Gateway;
use mirrorgate::registry::Registry;
use mirrorgate::server::Server;

pub const OPERATOR: &str = "ops-secret";
pub const AGENT_T1: &str = "agent-t1-secret";
pub const AGENT_UNASSIGNED: &str = "agent-t2-secret";
pub const REPO: &str = "app";

/// Run git with a clean environment and fail the test on error.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = git_output(dir, args);
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Run git and hand back the raw output.
pub fn git_output(dir: &Path, args: &[&str]) -> Output {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_AUTHOR_NAME", "Test User")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test User")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("failed to run git")
}

/// Tip of `branch` in `repo`, or `None` if it does not exist.
pub fn tip(repo: &Path, branch: &str) -> Option<String> {
    let output = git_output(
        repo,
        &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
    );
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Commit a file in a working clone and return the new tip.
pub fn commit_file(clone: &Path, name: &str, contents: &str) -> String {
    std::fs::write(clone.join(name), contents).unwrap();
    git(clone, &["add", name]);
    git(clone, &["commit", "-m", &format!("update {name}")]);
    git(clone, &["rev-parse", "HEAD"])
}

/// An upstream bare repository with one commit on main.
pub struct Upstream {
    pub dir: TempDir,
}

impl Upstream {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("upstream.git");
        let seed = dir.path().join("seed");
        git(dir.path(), &["init", "--bare", "-b", "main", bare.to_str().unwrap()]);
        git(dir.path(), &["init", "-b", "main", seed.to_str().unwrap()]);
        commit_file(&seed, "README.md", "# app\n");
        git(&seed, &["push", bare.to_str().unwrap(), "main"]);
        Self { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("upstream.git")
    }

    pub fn url(&self) -> String {
        self.path().to_string_lossy().into_owned()
    }

    /// Make the upstream refuse every update to `branch`.
    pub fn refuse_branch(&self, branch: &str) {
        let hook = self.path().join("hooks/pre-receive");
        let script = format!(
            "#!/bin/sh\nwhile read old new ref; do\n  if [ \"$ref\" = \"refs/heads/{branch}\" ]; then\n    echo \"{branch} is frozen\" >&2\n    exit 1\n  fi\ndone\nexit 0\n"
        );
        std::fs::write(&hook, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    /// Commit directly upstream, bypassing the gateway.
    pub fn commit_behind_gateway(&self, branch: &str, name: &str) -> String {
        let work = self.dir.path().join("direct");
        if !work.exists() {
            git(
                self.dir.path(),
                &["clone", &self.url(), work.to_str().unwrap()],
            );
        }
        git(&work, &["fetch", "origin"]);
        git(&work, &["checkout", "-B", branch, &format!("origin/{branch}")]);
        let oid = commit_file(&work, name, name);
        git(&work, &["push", "origin", branch]);
        oid
    }
}

/// Gateway configuration for one mirrored repository.
pub fn config_toml(repos_dir: &Path, origin: &str, early_check: bool) -> String {
    format!(
        r#"
[server]
repos_dir = "{repos}"
early_restriction_check = {early_check}

[hook]
protected_branches = ["main"]

[[repositories]]
id = "{REPO}"
project = "proj"
origin = "{origin}"

[[units_of_work]]
id = "T1"
project = "proj"
branch = "feature/T1"

[[units_of_work]]
id = "T2"
project = "proj"

[[credentials]]
token = "{OPERATOR}"
name = "ops"

[[credentials]]
token = "{AGENT_T1}"
name = "agent-t1"
unit_of_work = "T1"

[[credentials]]
token = "{AGENT_UNASSIGNED}"
name = "agent-t2"
unit_of_work = "T2"
"#,
        repos = repos_dir.display(),
    )
}

/// Parse the test configuration and open its registry, creating mirrors.
pub fn open(repos_dir: &Path, origin: &str, early_check: bool) -> (GatewayConfig, Arc<Registry>, Vec<mirrorgate::core::types::RepoId>) {
    let config = GatewayConfig::from_toml(&config_toml(repos_dir, origin, early_check)).unwrap();
    let (registry, created) = Registry::from_config(&config).unwrap();
    (config, Arc::new(registry), created)
}

/// A gateway serving HTTP on a background thread.
pub struct TestServer {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    pub state: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(upstream: &Upstream) -> Self {
        Self::start_with(upstream, true)
    }

    pub fn start_with(upstream: &Upstream, early_check: bool) -> Self {
        let state = TempDir::new().unwrap();
        let repos_dir = state.path().join("repos");
        let (config, registry, created) = open(&repos_dir, &upstream.url(), early_check);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let gateway = runtime.block_on(async {
            let gateway = Gateway::from_config(&config, registry);
            gateway.initial_sync(&created).await;
            gateway
        });

        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let server = Server::new(Arc::clone(&gateway), addr, config.max_body_bytes());
        let thread = std::thread::spawn(move || {
            runtime
                .block_on(server.serve(listener, async {
                    let _ = rx.await;
                }))
                .unwrap();
        });

        Self {
            addr,
            gateway,
            state,
            shutdown: Some(tx),
            thread: Some(thread),
        }
    }

    /// Clone URL with `secret` embedded as basic-auth password.
    pub fn url(&self, secret: &str) -> String {
        format!("http://x:{secret}@{}/{REPO}", self.addr)
    }

    /// On-disk path of the hosted mirror.
    pub fn mirror(&self) -> PathBuf {
        self.state.path().join("repos").join(format!("{REPO}.git"))
    }

    /// Clone through the gateway into a fresh directory.
    pub fn clone_as(&self, secret: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("work");
        git(dir.path(), &["clone", &self.url(secret), target.to_str().unwrap()]);
        dir
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Working tree inside a [`TestServer::clone_as`] directory.
pub fn work(dir: &TempDir) -> PathBuf {
    dir.path().join("work")
}
