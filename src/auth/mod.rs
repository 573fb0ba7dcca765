//! auth
//!
//! Caller identity and branch authorization.
//!
//! # Components
//!
//! - [`resolve`] - Branch Authorization Resolver: credential to [`Restriction`]
//! - [`Authenticator`] - Maps a presented secret to a [`Credential`]
//! - [`PermissionChecker`] - Project-level read/write permission
//! - [`StaticAuth`] - Both seams, backed by the configuration file
//!
//! Identity and project permissions belong to the surrounding platform; the
//! gateway only consumes them through the two traits. Branch restriction is
//! the gateway's own concern and never consults either of them.
//!
//! # Security
//!
//! Secrets never appear in logs, errors, or `Debug` output. Credentials
//! carry a non-secret subject label for that purpose.
//!
//! [`Restriction`]: crate::core::types::Restriction

mod resolver;
mod static_auth;

pub use resolver::resolve;
pub use static_auth::StaticAuth;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::{Credential, Repository};

/// Errors from the identity backend.
///
/// An unknown secret is not an error; `authenticate` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The backend could not answer.
    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),
}

/// Maps a presented secret to an authenticated caller.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns `Ok(None)` when the secret is not recognized.
    async fn authenticate(&self, secret: &str) -> Result<Option<Credential>, AuthError>;
}

/// Project-level permission checks for authenticated callers.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether `credential` may clone and fetch `repo`.
    async fn can_read(&self, credential: &Credential, repo: &Repository) -> Result<bool, AuthError>;

    /// Whether `credential` may push to `repo` at all. Branch-level
    /// confinement is applied separately by [`resolve`].
    async fn can_write(&self, credential: &Credential, repo: &Repository)
        -> Result<bool, AuthError>;
}
