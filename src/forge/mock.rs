//! forge::mock
//!
//! In-memory forge for deterministic tests.
//!
//! # Example
//!
//! ```
//! use mirrorgate::forge::mock::MockForge;
//! use mirrorgate::forge::{CreatePrRequest, Forge, PrState};
//!
//! # tokio_test::block_on(async {
//! let forge = MockForge::new();
//! let pr = forge.create_pr(CreatePrRequest {
//!     head: "feature/T1".to_string(),
//!     base: "main".to_string(),
//!     title: "feature/T1".to_string(),
//!     body: None,
//!     draft: false,
//! }).await.unwrap();
//!
//! assert_eq!(pr.number, 1);
//! assert_eq!(pr.state, PrState::Open);
//! assert!(forge.find_pr_by_head("feature/T1").await.unwrap().is_some());
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::traits::{CreatePrRequest, Forge, ForgeError, PrState, PullRequest};

/// Mock forge; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockForge {
    inner: Arc<Mutex<MockForgeInner>>,
}

#[derive(Debug, Default)]
struct MockForgeInner {
    prs: BTreeMap<u64, PullRequest>,
    fail_on: Option<FailOn>,
    operations: Vec<MockOperation>,
}

/// Which operation should fail, and how.
#[derive(Debug, Clone)]
pub enum FailOn {
    CreatePr(ForgeError),
    FindPrByHead(ForgeError),
}

/// Recorded call, for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    CreatePr { head: String, base: String },
    FindPrByHead { head: String },
}

impl MockForge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the given operation until [`clear_fail_on`](Self::clear_fail_on).
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.state().fail_on = Some(fail_on);
        self
    }

    pub fn clear_fail_on(&self) {
        self.state().fail_on = None;
    }

    pub fn operations(&self) -> Vec<MockOperation> {
        self.state().operations.clone()
    }

    pub fn all_prs(&self) -> Vec<PullRequest> {
        self.state().prs.values().cloned().collect()
    }

    pub fn pr_count(&self) -> usize {
        self.state().prs.len()
    }

    /// Number of `create_pr` calls seen, successful or not.
    pub fn create_calls(&self) -> usize {
        self.state()
            .operations
            .iter()
            .filter(|op| matches!(op, MockOperation::CreatePr { .. }))
            .count()
    }

    fn state(&self) -> MutexGuard<'_, MockForgeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Forge for MockForge {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError> {
        let mut state = self.state();
        state.operations.push(MockOperation::CreatePr {
            head: request.head.clone(),
            base: request.base.clone(),
        });
        if let Some(FailOn::CreatePr(e)) = &state.fail_on {
            return Err(e.clone());
        }

        let number = state.prs.keys().next_back().map_or(1, |n| n + 1);
        let pr = PullRequest {
            number,
            url: format!("https://github.com/mock/repo/pull/{number}"),
            state: PrState::Open,
            is_draft: request.draft,
            head: request.head,
            base: request.base,
            title: request.title,
            body: request.body,
        };
        state.prs.insert(number, pr.clone());
        Ok(pr)
    }

    async fn find_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>, ForgeError> {
        let mut state = self.state();
        state.operations.push(MockOperation::FindPrByHead {
            head: head.to_string(),
        });
        if let Some(FailOn::FindPrByHead(e)) = &state.fail_on {
            return Err(e.clone());
        }
        Ok(state
            .prs
            .values()
            .find(|pr| pr.head == head && pr.state == PrState::Open)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(head: &str) -> CreatePrRequest {
        CreatePrRequest {
            head: head.into(),
            base: "main".into(),
            title: head.into(),
            body: None,
            draft: false,
        }
    }

    #[tokio::test]
    async fn numbers_increase() {
        let forge = MockForge::new();
        assert_eq!(forge.create_pr(request("a")).await.unwrap().number, 1);
        assert_eq!(forge.create_pr(request("b")).await.unwrap().number, 2);
        assert_eq!(forge.pr_count(), 2);
    }

    #[tokio::test]
    async fn failure_is_injected_and_recorded() {
        let forge = MockForge::new().fail_on(FailOn::CreatePr(ForgeError::RateLimited));
        assert!(matches!(
            forge.create_pr(request("a")).await,
            Err(ForgeError::RateLimited)
        ));
        assert_eq!(forge.create_calls(), 1);
        assert_eq!(forge.pr_count(), 0);

        forge.clear_fail_on();
        assert!(forge.create_pr(request("a")).await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let forge = MockForge::new();
        let clone = forge.clone();
        clone.create_pr(request("a")).await.unwrap();
        assert!(forge.find_pr_by_head("a").await.unwrap().is_some());
        assert_eq!(
            forge.operations().last(),
            Some(&MockOperation::FindPrByHead { head: "a".into() })
        );
    }
}
