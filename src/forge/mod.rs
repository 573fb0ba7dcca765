//! forge
//!
//! Pull-request access to the forge hosting a repository's origin.
//!
//! # Modules
//!
//! - `traits`: Core `Forge` trait and request/response types
//! - [`github`]: GitHub implementation using the REST API
//! - [`mock`]: Mock implementation for deterministic testing
//!
//! Forges are selected from the origin URL with [`forge_for_origin`].
//! Only GitHub origins are recognized; anything else gets no forge and
//! its pushes simply have no PR follow-up.

pub mod github;
pub mod mock;
mod traits;

pub use traits::*;

use std::sync::Arc;

use crate::git::Git;

/// Build a forge for `origin`, if it is hosted somewhere we know.
///
/// # Example
///
/// ```
/// use mirrorgate::forge::{forge_for_origin, Forge};
///
/// let forge = forge_for_origin("https://github.com/acme/app.git", "t", None).unwrap();
/// assert_eq!(forge.name(), "github");
/// assert!(forge_for_origin("https://gitlab.com/acme/app.git", "t", None).is_none());
/// ```
pub fn forge_for_origin(
    origin: &str,
    token: &str,
    api_base: Option<&str>,
) -> Option<Arc<dyn Forge>> {
    let (owner, repo) = Git::parse_github_remote(origin)?;
    let forge = match api_base {
        Some(base) => github::GitHubForge::with_api_base(token, owner, repo, base),
        None => github::GitHubForge::new(token, owner, repo),
    };
    Some(Arc::new(forge))
}
