//! Startup reconciliation against a real upstream.

mod common;

use common::*;
use mirrorgate::gateway::Gateway;
use mirrorgate::reconcile::Reconciler;
use tempfile::TempDir;

/// Leave a commit in the mirror that upstream never received, as a crash
/// between accept and propagate would.
fn strand_commit(mirror: &std::path::Path, branch: &str) -> String {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    git(dir.path(), &["clone", mirror.to_str().unwrap(), work.to_str().unwrap()]);
    git(&work, &["checkout", "-b", branch]);
    let oid = commit_file(&work, "stranded.txt", "stranded\n");
    git(&work, &["push", "origin", branch]);
    oid
}

#[tokio::test]
async fn replays_stranded_branch_once() {
    let upstream = Upstream::new();
    let state = TempDir::new().unwrap();
    let repos_dir = state.path().join("repos");
    let (config, registry, created) = open(&repos_dir, &upstream.url(), true);
    let gateway = Gateway::from_config(&config, registry);
    gateway.initial_sync(&created).await;

    let mirror = repos_dir.join(format!("{REPO}.git"));
    let oid = strand_commit(&mirror, "stranded");
    assert_eq!(tip(&upstream.path(), "stranded"), None);

    let report = Reconciler::new(gateway.clone()).run().await;
    assert!(report.is_clean(), "{:?}", report.failed);
    assert_eq!(report.pushed.len(), 1);
    assert_eq!(report.pushed[0].branch.as_str(), "stranded");
    assert_eq!(tip(&upstream.path(), "stranded").as_deref(), Some(oid.as_str()));

    let again = Reconciler::new(gateway).run().await;
    assert!(again.is_clean());
    assert!(again.pushed.is_empty());
}

/// Advance a branch the mirror already tracks by `commits` local commits.
fn advance_tracked(mirror: &std::path::Path, branch: &str, commits: usize) -> String {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    git(dir.path(), &["clone", mirror.to_str().unwrap(), work.to_str().unwrap()]);
    git(&work, &["checkout", branch]);
    let mut oid = String::new();
    for n in 0..commits {
        oid = commit_file(&work, &format!("local-{n}.txt"), "local\n");
    }
    git(&work, &["push", "origin", branch]);
    oid
}

#[tokio::test]
async fn counts_commits_ahead_of_tracking_ref() {
    let upstream = Upstream::new();
    let state = TempDir::new().unwrap();
    let repos_dir = state.path().join("repos");
    let (config, registry, created) = open(&repos_dir, &upstream.url(), true);
    let gateway = Gateway::from_config(&config, registry);
    gateway.initial_sync(&created).await;

    let mirror = repos_dir.join(format!("{REPO}.git"));
    let before = tip(&upstream.path(), "main");
    let oid = advance_tracked(&mirror, "main", 3);
    assert_eq!(tip(&upstream.path(), "main"), before);

    let report = Reconciler::new(gateway.clone()).run().await;
    assert!(report.is_clean(), "{:?}", report.failed);
    assert_eq!(report.pushed.len(), 1);
    assert_eq!(report.pushed[0].branch.as_str(), "main");
    assert_eq!(report.pushed[0].ahead, Some(3));
    assert_eq!(tip(&upstream.path(), "main").as_deref(), Some(oid.as_str()));

    let again = Reconciler::new(gateway).run().await;
    assert!(again.is_clean());
    assert!(again.pushed.is_empty());
}

#[tokio::test]
async fn clean_mirror_needs_nothing() {
    let upstream = Upstream::new();
    let state = TempDir::new().unwrap();
    let (config, registry, created) = open(&state.path().join("repos"), &upstream.url(), true);
    let gateway = Gateway::from_config(&config, registry);
    gateway.initial_sync(&created).await;

    let report = Reconciler::new(gateway).run().await;

    assert!(report.is_clean());
    assert!(report.pushed.is_empty());
}
