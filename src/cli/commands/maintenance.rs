//! install-hooks and reconcile commands

use std::path::Path;

use anyhow::{Context, Result};

use super::open;
use crate::gateway::Gateway;
use crate::reconcile::Reconciler;

/// Install or upgrade the pre-receive hook everywhere.
pub fn install_hooks(config: Option<&Path>) -> Result<()> {
    let opened = open(config)?;
    let report = opened
        .registry
        .hook()
        .install_all(opened.registry.repos_dir())
        .context("failed to install hooks")?;
    println!(
        "installed {}, updated {}, unchanged {}, errors {}",
        report.installed, report.updated, report.unchanged, report.errors
    );
    if report.errors > 0 {
        anyhow::bail!("{} repositories could not be updated", report.errors);
    }
    Ok(())
}

/// One reconciliation pass.
pub async fn reconcile(config: Option<&Path>) -> Result<()> {
    let opened = open(config)?;
    let gateway = Gateway::from_config(&opened.config, opened.registry);
    let report = Reconciler::new(gateway).run().await;
    for replayed in &report.pushed {
        println!("pushed {}:{}", replayed.repo, replayed.branch);
    }
    for failure in &report.failed {
        match &failure.branch {
            Some(branch) => eprintln!("failed {}:{}: {}", failure.repo, branch, failure.message),
            None => eprintln!("failed {}: {}", failure.repo, failure.message),
        }
    }
    report.into_result()?;
    Ok(())
}
