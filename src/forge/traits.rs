//! forge::traits
//!
//! Forge trait definition and request/response types.
//!
//! The gateway only needs two forge operations: find the open pull request
//! for a head branch, and open one. Forge failures never affect local or
//! upstream ref state; callers log them and move on.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from forge operations.
#[derive(Debug, Clone, Error)]
pub enum ForgeError {
    /// No token is configured for the forge.
    #[error("authentication required")]
    AuthRequired,

    /// The token is invalid, expired or lacks permissions.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited")]
    RateLimited,

    /// API returned an error.
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    #[error("network error: {0}")]
    NetworkError(String),
}

/// Request to create a pull request.
#[derive(Debug, Clone)]
pub struct CreatePrRequest {
    /// Head branch name (the branch with changes)
    pub head: String,
    /// Base branch name (the branch to merge into)
    pub base: String,
    pub title: String,
    pub body: Option<String>,
    pub draft: bool,
}

/// Pull request information returned from the forge.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    /// Web URL for viewing
    pub url: String,
    pub state: PrState,
    pub is_draft: bool,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrState::Open => write!(f, "open"),
            PrState::Closed => write!(f, "closed"),
            PrState::Merged => write!(f, "merged"),
        }
    }
}

/// A remote hosting service that can open pull requests for a repository.
///
/// Implementations must be `Send + Sync`; follow-up tasks share one forge
/// per repository across the runtime.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Short provider name for logs, e.g. `"github"`.
    fn name(&self) -> &'static str;

    /// Create a new pull request.
    ///
    /// # Errors
    ///
    /// - `AuthRequired` / `AuthFailed` for token problems
    /// - `ApiError` with status 422 if validation fails (e.g. head doesn't exist)
    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError>;

    /// Find the open pull request whose head is `head`, if any.
    async fn find_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>, ForgeError>;
}
