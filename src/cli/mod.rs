//! cli
//!
//! Command-line interface layer for mirrorgate.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Initialize logging
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. Every command that touches a repository goes
//! through a [`crate::gateway::Gateway`], so the CLI takes the same locks
//! as the HTTP server.

pub mod args;
pub mod commands;

pub use args::{Cli, Command, Shell};

use anyhow::{Context, Result};

use crate::logging::{init_logging, LogConfig};

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();

    if let Command::Completion { shell } = cli.command {
        return commands::completion(shell);
    }

    init_logging(&LogConfig {
        level: cli.log_level,
        format: cli.log_format,
    })?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
    runtime.block_on(commands::dispatch(cli.command, cli.config.as_deref()))
}
