//! core::config
//!
//! Configuration loading.
//!
//! # Locations
//!
//! The first existing file wins:
//! 1. The path given on the command line (`--config`)
//! 2. `$MIRRORGATE_CONFIG`
//! 3. `$XDG_CONFIG_HOME/mirrorgate/config.toml`
//! 4. `~/.mirrorgate/config.toml`
//!
//! A path given explicitly on the command line must exist. When none of the
//! other locations exist, defaults are used.
//!
//! # Example
//!
//! ```no_run
//! use mirrorgate::core::config::Config;
//!
//! let loaded = Config::load(None).unwrap();
//! println!("listening on {}", loaded.config.listen_addr().unwrap());
//! ```

pub mod schema;

pub use schema::{
    CredentialEntry, ForgeSection, GatewayConfig, HookSection, RepositoryEntry, ServerSection,
    SessionEntry, UnitOfWorkEntry, UpstreamSection,
};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MIRRORGATE_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Configuration loader.
#[derive(Debug)]
pub struct Config;

/// A loaded configuration and where it came from.
#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: GatewayConfig,
    /// `None` when no file was found and defaults are in effect.
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an explicit path or the default locations.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotFound`] if `explicit` is given but does not exist
    /// - [`ConfigError::ParseError`] / [`ConfigError::InvalidValue`] for bad content
    pub fn load(explicit: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Ok(ConfigLoadResult {
                config: Self::read(path)?,
                path: Some(path.to_path_buf()),
            });
        }

        let candidates = Self::candidates(
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
            dirs::home_dir(),
        );
        match candidates.into_iter().find(|p| p.exists()) {
            Some(path) => Ok(ConfigLoadResult {
                config: Self::read(&path)?,
                path: Some(path),
            }),
            None => Ok(ConfigLoadResult {
                config: GatewayConfig::default(),
                path: None,
            }),
        }
    }

    /// Candidate config locations in lookup order.
    fn candidates(
        env_path: Option<PathBuf>,
        xdg_home: Option<PathBuf>,
        home: Option<PathBuf>,
    ) -> Vec<PathBuf> {
        let mut out = Vec::new();
        out.extend(env_path);
        out.extend(xdg_home.map(|d| d.join("mirrorgate/config.toml")));
        out.extend(home.map(|d| d.join(".mirrorgate/config.toml")));
        out
    }

    /// Read, parse and validate one config file.
    pub fn read(path: &Path) -> Result<GatewayConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: GatewayConfig = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}
