//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Loads configuration and opens the registry
//! 2. Builds a gateway from the configuration
//! 3. Calls the gateway (or reconciler) and reports the result
//!
//! Handlers do NOT touch refs directly.

mod completion;
mod maintenance;
mod repo;
mod serve;

pub use completion::completion;
pub use maintenance::{install_hooks, reconcile};
pub use repo::{push, sync};
pub use serve::serve;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::args::Command;
use crate::core::config::{Config, GatewayConfig};
use crate::core::types::RepoId;
use crate::registry::Registry;

/// Dispatch a command to its handler.
pub async fn dispatch(command: Command, config: Option<&Path>) -> Result<()> {
    match command {
        Command::Serve { listen } => serve::serve(config, listen).await,
        Command::InstallHooks => maintenance::install_hooks(config),
        Command::Reconcile => maintenance::reconcile(config).await,
        Command::Sync { repo } => repo::sync(config, &repo).await,
        Command::Push { repo, branch } => repo::push(config, &repo, &branch).await,
        Command::Completion { shell } => completion::completion(shell),
    }
}

/// Loaded configuration plus the opened registry.
pub(crate) struct Opened {
    pub config: GatewayConfig,
    pub registry: Arc<Registry>,
    /// Repositories created by this open.
    pub created: Vec<RepoId>,
}

pub(crate) fn open(config: Option<&Path>) -> Result<Opened> {
    let loaded = Config::load(config).context("failed to load configuration")?;
    match &loaded.path {
        Some(path) => tracing::info!(path = %path.display(), "loaded configuration"),
        None => tracing::info!("no configuration file found; using defaults"),
    }
    let (registry, created) = Registry::from_config(&loaded.config)
        .context("failed to open configured repositories")?;
    Ok(Opened {
        config: loaded.config,
        registry: Arc::new(registry),
        created,
    })
}
