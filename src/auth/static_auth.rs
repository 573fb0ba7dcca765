//! auth::static_auth
//!
//! Configuration-backed authenticator and permission checker.
//!
//! Secrets are held only as SHA-256 digests. A credential's subject is its
//! configured name, or `cred-<first 8 hex of the digest>` when unnamed.
//!
//! # Permissions
//!
//! - An empty `projects` list grants every project.
//! - Agent credentials are further limited to the project of their unit of
//!   work, whatever `projects` says.
//! - `read_only` credentials may fetch but never push.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{AuthError, Authenticator, PermissionChecker};
use crate::core::config::GatewayConfig;
use crate::core::types::{Association, Credential, Repository, UnitOfWork};

#[derive(Debug, Clone)]
struct Grant {
    credential: Credential,
    projects: Vec<String>,
    read_only: bool,
}

impl Grant {
    fn covers(&self, repo: &Repository) -> bool {
        let listed = self.projects.is_empty() || self.projects.iter().any(|p| *p == repo.project);
        let unit_project = self
            .credential
            .association()
            .and_then(Association::unit)
            .map_or(true, |unit| unit.project == repo.project);
        listed && unit_project
    }
}

/// [`Authenticator`] and [`PermissionChecker`] over the `[[credentials]]`,
/// `[[sessions]]` and `[[units_of_work]]` tables.
#[derive(Default)]
pub struct StaticAuth {
    by_digest: HashMap<String, Grant>,
    by_subject: HashMap<String, Grant>,
}

impl std::fmt::Debug for StaticAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut subjects: Vec<&str> = self.by_subject.keys().map(String::as_str).collect();
        subjects.sort_unstable();
        f.debug_struct("StaticAuth")
            .field("subjects", &subjects)
            .finish()
    }
}

fn digest(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

impl StaticAuth {
    /// Build from a validated configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let units: HashMap<&str, UnitOfWork> = config
            .units_of_work
            .iter()
            .map(|u| {
                let unit = match &u.branch {
                    Some(branch) => UnitOfWork::with_branch(&u.id, &u.project, branch.clone()),
                    None => UnitOfWork::new(&u.id, &u.project),
                };
                (u.id.as_str(), unit)
            })
            .collect();
        let sessions: HashMap<&str, Option<&str>> = config
            .sessions
            .iter()
            .map(|s| (s.id.as_str(), s.unit_of_work.as_deref()))
            .collect();

        let mut auth = Self::default();
        for entry in &config.credentials {
            let digest = digest(&entry.token);
            let subject = entry
                .name
                .clone()
                .unwrap_or_else(|| format!("cred-{}", &digest[..8]));

            let association = if let Some(unit) = &entry.unit_of_work {
                units
                    .get(unit.as_str())
                    .cloned()
                    .map(Association::UnitOfWork)
            } else {
                entry.session.as_ref().map(|session| Association::Session {
                    id: session.clone(),
                    unit: sessions
                        .get(session.as_str())
                        .copied()
                        .flatten()
                        .and_then(|unit| units.get(unit).cloned()),
                })
            };
            let credential = match association {
                Some(association) => Credential::agent(subject, association),
                None => Credential::operator(subject),
            };
            auth.insert(digest, credential, entry.projects.clone(), entry.read_only);
        }
        auth
    }

    fn insert(&mut self, digest: String, credential: Credential, projects: Vec<String>, read_only: bool) {
        let grant = Grant {
            credential,
            projects,
            read_only,
        };
        self.by_subject
            .insert(grant.credential.subject().to_string(), grant.clone());
        self.by_digest.insert(digest, grant);
    }

    /// Register one credential directly.
    pub fn with_credential(
        mut self,
        secret: &str,
        credential: Credential,
        projects: Vec<String>,
    ) -> Self {
        self.insert(digest(secret), credential, projects, false);
        self
    }

    /// Register a fetch-only credential.
    pub fn with_read_only(mut self, secret: &str, credential: Credential) -> Self {
        self.insert(digest(secret), credential, Vec::new(), true);
        self
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    fn grant_for(&self, credential: &Credential) -> Option<&Grant> {
        self.by_subject
            .get(credential.subject())
            .filter(|grant| grant.credential == *credential)
    }
}

#[async_trait]
impl Authenticator for StaticAuth {
    async fn authenticate(&self, secret: &str) -> Result<Option<Credential>, AuthError> {
        Ok(self
            .by_digest
            .get(&digest(secret))
            .map(|grant| grant.credential.clone()))
    }
}

#[async_trait]
impl PermissionChecker for StaticAuth {
    async fn can_read(&self, credential: &Credential, repo: &Repository) -> Result<bool, AuthError> {
        Ok(self.grant_for(credential).is_some_and(|g| g.covers(repo)))
    }

    async fn can_write(
        &self,
        credential: &Credential,
        repo: &Repository,
    ) -> Result<bool, AuthError> {
        Ok(self
            .grant_for(credential)
            .is_some_and(|g| !g.read_only && g.covers(repo)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::resolve;
    use crate::core::types::{BranchName, DenyReason, RepoId, Restriction};
    use std::path::PathBuf;

    fn config() -> GatewayConfig {
        GatewayConfig::from_toml(
            r#"
            [[units_of_work]]
            id = "T1"
            project = "p1"
            branch = "feature/T1"

            [[units_of_work]]
            id = "T2"
            project = "p1"

            [[sessions]]
            id = "s1"
            unit_of_work = "T1"

            [[sessions]]
            id = "s2"

            [[credentials]]
            token = "operator-secret"
            name = "ops"

            [[credentials]]
            token = "scoped-operator"
            name = "p2-ops"
            projects = ["p2"]

            [[credentials]]
            token = "agent-unit"
            unit_of_work = "T1"

            [[credentials]]
            token = "agent-unassigned"
            unit_of_work = "T2"

            [[credentials]]
            token = "agent-session"
            session = "s1"

            [[credentials]]
            token = "agent-idle"
            session = "s2"

            [[credentials]]
            token = "viewer"
            name = "viewer"
            read_only = true
            "#,
        )
        .unwrap()
    }

    fn repo(project: &str) -> Repository {
        Repository::new(
            RepoId::new("app").unwrap(),
            "app",
            project,
            None,
            PathBuf::from("/tmp/app.git"),
            BranchName::main(),
        )
    }

    async fn login(auth: &StaticAuth, secret: &str) -> Credential {
        auth.authenticate(secret).await.unwrap().unwrap()
    }

    mod authenticate {
        use super::*;

        #[tokio::test]
        async fn unknown_secret_is_none() {
            let auth = StaticAuth::from_config(&config());
            assert!(auth.authenticate("nope").await.unwrap().is_none());
            assert!(auth.authenticate("").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn operator_has_no_association() {
            let auth = StaticAuth::from_config(&config());
            let cred = login(&auth, "operator-secret").await;
            assert_eq!(cred.subject(), "ops");
            assert!(!cred.is_agent());
        }

        #[tokio::test]
        async fn unnamed_subject_is_digest_prefix() {
            let auth = StaticAuth::from_config(&config());
            let cred = login(&auth, "agent-unit").await;
            assert!(cred.subject().starts_with("cred-"));
            assert_eq!(cred.subject().len(), "cred-".len() + 8);
            assert!(!cred.subject().contains("agent-unit"));
        }

        #[tokio::test]
        async fn associations_resolve_to_restrictions() {
            let auth = StaticAuth::from_config(&config());
            let t1 = BranchName::new("feature/T1").unwrap();

            assert_eq!(
                resolve(&login(&auth, "agent-unit").await),
                Restriction::RestrictedTo(t1.clone())
            );
            assert_eq!(
                resolve(&login(&auth, "agent-session").await),
                Restriction::RestrictedTo(t1)
            );
            assert_eq!(
                resolve(&login(&auth, "agent-unassigned").await),
                Restriction::Denied(DenyReason::NoBranchAssigned)
            );
            assert_eq!(
                resolve(&login(&auth, "agent-idle").await),
                Restriction::Denied(DenyReason::NoUnitOfWork)
            );
        }

        #[test]
        fn debug_lists_subjects_only() {
            let auth = StaticAuth::from_config(&config());
            let debug = format!("{auth:?}");
            assert!(debug.contains("ops"));
            assert!(!debug.contains("operator-secret"));
            assert_eq!(auth.len(), 7);
        }
    }

    mod permissions {
        use super::*;

        #[tokio::test]
        async fn unscoped_operator_reaches_every_project() {
            let auth = StaticAuth::from_config(&config());
            let cred = login(&auth, "operator-secret").await;
            assert!(auth.can_write(&cred, &repo("p1")).await.unwrap());
            assert!(auth.can_write(&cred, &repo("other")).await.unwrap());
        }

        #[tokio::test]
        async fn project_list_limits_access() {
            let auth = StaticAuth::from_config(&config());
            let cred = login(&auth, "scoped-operator").await;
            assert!(auth.can_read(&cred, &repo("p2")).await.unwrap());
            assert!(!auth.can_read(&cred, &repo("p1")).await.unwrap());
            assert!(!auth.can_write(&cred, &repo("p1")).await.unwrap());
        }

        #[tokio::test]
        async fn agent_limited_to_unit_project() {
            let auth = StaticAuth::from_config(&config());
            let cred = login(&auth, "agent-unit").await;
            assert!(auth.can_write(&cred, &repo("p1")).await.unwrap());
            assert!(!auth.can_write(&cred, &repo("p2")).await.unwrap());
        }

        #[tokio::test]
        async fn read_only_cannot_write() {
            let auth = StaticAuth::from_config(&config());
            let cred = login(&auth, "viewer").await;
            assert!(auth.can_read(&cred, &repo("p1")).await.unwrap());
            assert!(!auth.can_write(&cred, &repo("p1")).await.unwrap());
        }

        #[tokio::test]
        async fn foreign_credential_has_no_permissions() {
            let auth = StaticAuth::from_config(&config());
            let stranger = Credential::operator("ops-impostor");
            assert!(!auth.can_read(&stranger, &repo("p1")).await.unwrap());
        }

        #[tokio::test]
        async fn builder_registers_credentials() {
            let auth = StaticAuth::default()
                .with_credential("s3cret", Credential::operator("alice"), vec!["p1".into()])
                .with_read_only("peek", Credential::operator("bob"));
            let alice = login(&auth, "s3cret").await;
            let bob = login(&auth, "peek").await;
            assert!(auth.can_write(&alice, &repo("p1")).await.unwrap());
            assert!(!auth.can_write(&bob, &repo("p1")).await.unwrap());
        }
    }
}
