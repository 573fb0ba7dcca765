//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--config <path>`: Configuration file (must exist when given)
//! - `--log-level <level>`: Overrides `RUST_LOG`
//! - `--log-format text|json`: Log output format

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::{LogFormat, LogLevel};

/// mirrorgate - smart-HTTP git gateway for agent fleets
#[derive(Parser, Debug)]
#[command(name = "mirrorgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log verbosity; defaults to RUST_LOG, then info
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve git over HTTP
    #[command(long_about = "Serve git over HTTP.\n\n\
        Startup order: open (and create) the configured repositories, install or \
        upgrade pre-receive hooks, sync newly created mirrors, replay any branch \
        that is ahead of upstream, then start listening. Ctrl-C stops accepting \
        connections and waits for in-flight follow-ups.")]
    Serve {
        /// Listen address, overriding [server].listen
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Install or upgrade the pre-receive hook in every repository
    InstallHooks,

    /// Push every local branch that is ahead of upstream
    #[command(long_about = "Push every local branch that is ahead of upstream.\n\n\
        Runs the same pass `serve` runs before listening. Do not run it against \
        repositories a live server is using.")]
    Reconcile,

    /// Force-sync one repository from upstream
    Sync {
        /// Repository id
        repo: String,
    },

    /// Push one branch of a repository to upstream
    Push {
        /// Repository id
        repo: String,
        /// Branch name
        branch: String,
    },

    /// Generate shell completion scripts
    #[command(after_help = "\
EXAMPLES:
    mirrorgate completion bash > /etc/bash_completion.d/mirrorgate
    mirrorgate completion zsh > \"${fpath[1]}/_mirrorgate\"
    mirrorgate completion fish > ~/.config/fish/completions/mirrorgate.fish")]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mirrorgate",
            "sync",
            "app",
            "--config",
            "/etc/mirrorgate.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Sync { ref repo } if repo == "app"));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.config.is_some());
    }

    #[test]
    fn push_needs_branch() {
        assert!(Cli::try_parse_from(["mirrorgate", "push", "app"]).is_err());
    }
}
