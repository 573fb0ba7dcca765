//! sync and push commands
//!
//! Operator equivalents of the management API's "sync now" and "push branch
//! to remote". They take the repository's file lock, so they wait for a
//! running server's operation on the same repository and vice versa.

use std::path::Path;

use anyhow::{Context, Result};

use super::open;
use crate::core::types::{BranchName, Oid};
use crate::gateway::Gateway;

/// Force-sync one repository from upstream.
pub async fn sync(config: Option<&Path>, repo: &str) -> Result<()> {
    let opened = open(config)?;
    let gateway = Gateway::from_config(&opened.config, opened.registry);
    let repo = gateway.repository(repo)?;

    let changes = gateway
        .sync_now(&repo)
        .await
        .with_context(|| format!("failed to sync {}", repo.id))?;
    if changes.is_empty() {
        println!("{} is up to date", repo.id);
    }
    let show = |oid: Option<&Oid>| oid.map_or("(none)", |o| o.short(8)).to_string();
    for change in changes {
        println!(
            "{}: {} -> {}",
            change.branch,
            show(change.before.as_ref()),
            show(change.after.as_ref())
        );
    }
    Ok(())
}

/// Push one branch to upstream.
pub async fn push(config: Option<&Path>, repo: &str, branch: &str) -> Result<()> {
    let branch = BranchName::new(branch).context("invalid branch name")?;
    let opened = open(config)?;
    let gateway = Gateway::from_config(&opened.config, opened.registry);
    let repo = gateway.repository(repo)?;

    gateway
        .push_to_remote(&repo, &branch)
        .await
        .with_context(|| format!("failed to push {branch} of {}", repo.id))?;
    println!("pushed {}:{branch}", repo.id);
    Ok(())
}
