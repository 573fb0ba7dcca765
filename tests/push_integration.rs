//! End-to-end push and fetch scenarios over HTTP.
//!
//! Each test starts a gateway in front of a throwaway upstream and drives it
//! with the git client, then checks the refs on both sides.

mod common;

use common::*;

#[test]
fn operator_push_reaches_upstream() {
    let upstream = Upstream::new();
    let server = TestServer::start(&upstream);
    let clone = server.clone_as(OPERATOR);
    let work = work(&clone);

    git(&work, &["checkout", "-b", "feature/ops"]);
    let oid = commit_file(&work, "ops.txt", "ops\n");
    git(&work, &["push", "origin", "feature/ops"]);

    assert_eq!(tip(&upstream.path(), "feature/ops").as_deref(), Some(oid.as_str()));
    assert_eq!(tip(&server.mirror(), "feature/ops").as_deref(), Some(oid.as_str()));
}

#[test]
fn agent_push_to_assigned_branch_is_accepted() {
    let upstream = Upstream::new();
    let server = TestServer::start(&upstream);
    let clone = server.clone_as(AGENT_T1);
    let work = work(&clone);

    git(&work, &["checkout", "-b", "feature/T1"]);
    let oid = commit_file(&work, "t1.txt", "work\n");
    git(&work, &["push", "origin", "feature/T1"]);

    assert_eq!(tip(&upstream.path(), "feature/T1").as_deref(), Some(oid.as_str()));
}

#[test]
fn agent_push_outside_assigned_branch_is_refused() {
    let upstream = Upstream::new();
    let server = TestServer::start(&upstream);
    let clone = server.clone_as(AGENT_T1);
    let work = work(&clone);

    git(&work, &["checkout", "-b", "feature/other"]);
    commit_file(&work, "other.txt", "nope\n");
    let output = git_output(&work, &["push", "origin", "feature/other"]);

    assert!(!output.status.success());
    assert_eq!(tip(&server.mirror(), "feature/other"), None);
    assert_eq!(tip(&upstream.path(), "feature/other"), None);
}

#[test]
fn out_of_branch_update_rolls_back_whole_push_without_early_check() {
    let upstream = Upstream::new();
    let server = TestServer::start_with(&upstream, false);
    let clone = server.clone_as(AGENT_T1);
    let work = work(&clone);

    git(&work, &["checkout", "-b", "feature/T1"]);
    commit_file(&work, "t1.txt", "mine\n");
    git(&work, &["checkout", "-b", "feature/other"]);
    commit_file(&work, "other.txt", "not mine\n");
    // receive-pack has already reported success by the time the gateway
    // rolls back, so only the refs tell the story.
    let _ = git_output(&work, &["push", "origin", "feature/T1", "feature/other"]);

    for branch in ["feature/T1", "feature/other"] {
        assert_eq!(tip(&server.mirror(), branch), None, "{branch} left in mirror");
        assert_eq!(tip(&upstream.path(), branch), None, "{branch} reached upstream");
    }
}

#[test]
fn unassigned_agent_can_clone_but_not_push() {
    let upstream = Upstream::new();
    let server = TestServer::start(&upstream);
    let clone = server.clone_as(AGENT_UNASSIGNED);
    let work = work(&clone);

    git(&work, &["checkout", "-b", "feature/T2"]);
    commit_file(&work, "t2.txt", "work\n");
    let output = git_output(&work, &["push", "origin", "feature/T2"]);

    assert!(!output.status.success());
    assert_eq!(tip(&upstream.path(), "feature/T2"), None);
}

#[test]
fn force_push_to_protected_branch_is_rejected() {
    let upstream = Upstream::new();
    let server = TestServer::start(&upstream);
    let before = tip(&upstream.path(), "main");
    let clone = server.clone_as(OPERATOR);
    let work = work(&clone);

    git(&work, &["commit", "--amend", "-m", "rewritten"]);
    let output = git_output(&work, &["push", "--force", "origin", "main"]);

    assert!(!output.status.success());
    assert_eq!(tip(&upstream.path(), "main"), before);
    assert_eq!(tip(&server.mirror(), "main"), before);
}

#[test]
fn upstream_refusal_rolls_back_mirror() {
    let upstream = Upstream::new();
    upstream.refuse_branch("frozen");
    let server = TestServer::start(&upstream);
    let clone = server.clone_as(OPERATOR);
    let work = work(&clone);

    git(&work, &["checkout", "-b", "frozen"]);
    commit_file(&work, "frozen.txt", "ice\n");
    let _ = git_output(&work, &["push", "origin", "frozen"]);

    assert_eq!(tip(&server.mirror(), "frozen"), None);
    assert_eq!(tip(&upstream.path(), "frozen"), None);
}

#[test]
fn fetch_sees_commits_made_directly_upstream() {
    let upstream = Upstream::new();
    let server = TestServer::start(&upstream);
    let clone = server.clone_as(OPERATOR);
    let work = work(&clone);

    let oid = upstream.commit_behind_gateway("main", "direct.txt");
    git(&work, &["fetch", "origin"]);

    assert_eq!(git(&work, &["rev-parse", "origin/main"]), oid);
    assert_eq!(tip(&server.mirror(), "main").as_deref(), Some(oid.as_str()));
}

#[test]
fn branch_deletion_propagates_upstream() {
    let upstream = Upstream::new();
    let server = TestServer::start(&upstream);
    let clone = server.clone_as(OPERATOR);
    let work = work(&clone);

    git(&work, &["checkout", "-b", "scratch"]);
    commit_file(&work, "scratch.txt", "tmp\n");
    git(&work, &["push", "origin", "scratch"]);
    assert!(tip(&upstream.path(), "scratch").is_some());

    git(&work, &["push", "origin", "--delete", "scratch"]);

    assert_eq!(tip(&upstream.path(), "scratch"), None);
    assert_eq!(tip(&server.mirror(), "scratch"), None);
}

#[test]
fn wrong_secret_cannot_clone() {
    let upstream = Upstream::new();
    let server = TestServer::start(&upstream);
    let dir = tempfile::TempDir::new().unwrap();

    let output = git_output(dir.path(), &["clone", &server.url("bogus"), "work"]);

    assert!(!output.status.success());
}
