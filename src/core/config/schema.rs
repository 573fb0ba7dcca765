//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Example
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! repos_dir = "/var/lib/mirrorgate/repos"
//!
//! [upstream]
//! token = "ghp_..."
//!
//! [hook]
//! protected_branches = ["main", "specs"]
//!
//! [[repositories]]
//! id = "app"
//! name = "App"
//! project = "proj-1"
//! origin = "https://github.com/acme/app.git"
//!
//! [[units_of_work]]
//! id = "T1"
//! project = "proj-1"
//! branch = "feature/T1"
//!
//! [[credentials]]
//! token = "agent-secret"
//! unit_of_work = "T1"
//! ```
//!
//! # Validation
//!
//! Values are validated after parsing: branch names and repository ids must
//! be well formed, cross references (credential -> session/unit, session ->
//! unit) must resolve, and an agent credential may name a session or a unit
//! of work but not both.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::{BranchName, RepoId};

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Default body limit for pack uploads (512 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

/// Default upstream fetch/push timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 300;

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub server: ServerSection,
    pub upstream: UpstreamSection,
    pub hook: HookSection,
    pub forge: ForgeSection,
    pub repositories: Vec<RepositoryEntry>,
    pub credentials: Vec<CredentialEntry>,
    pub units_of_work: Vec<UnitOfWorkEntry>,
    pub sessions: Vec<SessionEntry>,
}

/// `[server]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Address to bind, e.g. `0.0.0.0:8080`
    pub listen: Option<String>,
    /// Directory holding one `<id>.git` bare repository per entity
    pub repos_dir: Option<PathBuf>,
    /// Request body limit for pack uploads
    pub max_body_bytes: Option<usize>,
    /// Reject out-of-branch updates inside the hook instead of only rolling back
    pub early_restriction_check: Option<bool>,
}

/// `[upstream]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamSection {
    /// Token presented to HTTPS origins as `x-access-token`
    pub token: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
    pub push_timeout_secs: Option<u64>,
}

/// `[hook]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HookSection {
    /// Forward-only branches; defaults to `["main"]`
    pub protected_branches: Option<Vec<BranchName>>,
}

/// `[forge]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ForgeSection {
    pub enabled: Option<bool>,
    pub token: Option<String>,
    pub api_base: Option<String>,
    /// Base branch for follow-up PRs; defaults to each repository's default branch
    pub pr_base: Option<BranchName>,
}

/// `[[repositories]]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RepositoryEntry {
    pub id: RepoId,
    #[serde(default)]
    pub name: Option<String>,
    pub project: String,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub default_branch: Option<BranchName>,
}

/// `[[credentials]]`
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CredentialEntry {
    pub token: String,
    /// Label used in logs; defaults to a prefix of the token's hash
    #[serde(default)]
    pub name: Option<String>,
    /// Projects this credential may access; empty means every project
    #[serde(default)]
    pub projects: Vec<String>,
    /// Clone/fetch only
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub unit_of_work: Option<String>,
}

impl std::fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("name", &self.name)
            .field("projects", &self.projects)
            .field("read_only", &self.read_only)
            .field("session", &self.session)
            .field("unit_of_work", &self.unit_of_work)
            .finish()
    }
}

/// `[[units_of_work]]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UnitOfWorkEntry {
    pub id: String,
    pub project: String,
    #[serde(default)]
    pub branch: Option<BranchName>,
}

/// `[[sessions]]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionEntry {
    pub id: String,
    #[serde(default)]
    pub unit_of_work: Option<String>,
}

impl GatewayConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig =
            toml::from_str(content).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(listen) = &self.server.listen {
            listen.parse::<SocketAddr>().map_err(|_| {
                ConfigError::InvalidValue(format!("server.listen is not a socket address: {listen}"))
            })?;
        }
        if self.server.max_body_bytes == Some(0) {
            return Err(ConfigError::InvalidValue(
                "server.max_body_bytes must be positive".into(),
            ));
        }

        let mut repo_ids = HashSet::new();
        for repo in &self.repositories {
            if !repo_ids.insert(repo.id.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate repository id '{}'",
                    repo.id
                )));
            }
            if matches!(&repo.origin, Some(origin) if origin.trim().is_empty()) {
                return Err(ConfigError::InvalidValue(format!(
                    "repository '{}' has an empty origin",
                    repo.id
                )));
            }
        }

        let units: HashSet<&str> = self.units_of_work.iter().map(|u| u.id.as_str()).collect();
        if units.len() != self.units_of_work.len() {
            return Err(ConfigError::InvalidValue("duplicate unit of work id".into()));
        }
        let sessions: HashSet<&str> = self.sessions.iter().map(|s| s.id.as_str()).collect();
        for session in &self.sessions {
            if let Some(unit) = &session.unit_of_work {
                if !units.contains(unit.as_str()) {
                    return Err(ConfigError::InvalidValue(format!(
                        "session '{}' references unknown unit of work '{unit}'",
                        session.id
                    )));
                }
            }
        }

        let mut tokens = HashSet::new();
        let mut names = HashSet::new();
        for (index, cred) in self.credentials.iter().enumerate() {
            if let Some(name) = &cred.name {
                if !names.insert(name.as_str()) {
                    return Err(ConfigError::InvalidValue(format!(
                        "credentials[{index}] repeats the name '{name}'"
                    )));
                }
            }
            if cred.token.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "credentials[{index}] has an empty token"
                )));
            }
            if !tokens.insert(cred.token.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "credentials[{index}] repeats another credential's token"
                )));
            }
            if cred.session.is_some() && cred.unit_of_work.is_some() {
                return Err(ConfigError::InvalidValue(format!(
                    "credentials[{index}] may name a session or a unit of work, not both"
                )));
            }
            if let Some(session) = &cred.session {
                if !sessions.contains(session.as_str()) {
                    return Err(ConfigError::InvalidValue(format!(
                        "credentials[{index}] references unknown session '{session}'"
                    )));
                }
            }
            if let Some(unit) = &cred.unit_of_work {
                if !units.contains(unit.as_str()) {
                    return Err(ConfigError::InvalidValue(format!(
                        "credentials[{index}] references unknown unit of work '{unit}'"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = self.server.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
        listen
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("invalid listen address: {listen}")))
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.server
            .repos_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("repos"))
    }

    pub fn max_body_bytes(&self) -> usize {
        self.server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES)
    }

    pub fn early_restriction_check(&self) -> bool {
        self.server.early_restriction_check.unwrap_or(true)
    }

    pub fn protected_branches(&self) -> Vec<BranchName> {
        match &self.hook.protected_branches {
            Some(branches) => branches.clone(),
            None => vec![BranchName::main()],
        }
    }

    pub fn fetch_timeout_secs(&self) -> u64 {
        self.upstream
            .fetch_timeout_secs
            .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS)
    }

    pub fn push_timeout_secs(&self) -> u64 {
        self.upstream
            .push_timeout_secs
            .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS)
    }

    pub fn forge_enabled(&self) -> bool {
        self.forge.enabled.unwrap_or(false)
    }
}
