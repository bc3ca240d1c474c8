//! Tests for the `ralphswarm` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

use crate::common::{story, TestRepo, BACKLOG};

#[allow(deprecated)]
fn ralphswarm_cmd() -> Command {
    Command::cargo_bin("ralphswarm").expect("Failed to find ralphswarm binary")
}

#[test]
fn test_status_reports_counts_and_pending_stories() {
    let repo = TestRepo::new(vec![story("US-002", 2), story("US-001", 1)]);
    repo.store.mark_complete(BACKLOG, "US-002").expect("mark");

    ralphswarm_cmd()
        .arg("--repo")
        .arg(&repo.root)
        .arg("status")
        .arg(BACKLOG)
        .assert()
        .success()
        .stdout(predicate::str::contains("Shop: 1/2 stories complete"))
        .stdout(predicate::str::contains("US-001 (priority 1) Build US-001"));
}

#[test]
fn test_next_prints_lowest_priority_pending_story() {
    let repo = TestRepo::new(vec![story("US-003", 3), story("US-002", 2)]);

    ralphswarm_cmd()
        .arg("--repo")
        .arg(&repo.root)
        .args(["next", BACKLOG])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("US-002"));
}

#[test]
fn test_next_when_everything_passes() {
    let repo = TestRepo::new(vec![story("US-001", 1)]);
    repo.store.mark_complete(BACKLOG, "US-001").expect("mark");

    ralphswarm_cmd()
        .arg("--repo")
        .arg(&repo.root)
        .args(["next", BACKLOG])
        .assert()
        .success()
        .stdout(predicate::str::contains("All stories complete"));
}

#[test]
fn test_missing_backlog_fails() {
    let repo = TestRepo::new(vec![]);

    ralphswarm_cmd()
        .arg("--repo")
        .arg(&repo.root)
        .args(["status", "missing"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("backlog 'missing' not found"));
}

#[test]
fn test_usage_error_exits_with_two() {
    ralphswarm_cmd()
        .args(["run"])
        .assert()
        .code(2);
}

#[test]
fn test_teardown_of_absent_workspace_succeeds() {
    let repo = TestRepo::new(vec![story("US-001", 1)]);

    ralphswarm_cmd()
        .arg("--repo")
        .arg(&repo.root)
        .args(["teardown", BACKLOG, "US-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed workspace for US-001"));
}

#[cfg(unix)]
#[test]
fn test_run_with_command_worker_completes_backlog() {
    use std::os::unix::fs::PermissionsExt;

    let repo = TestRepo::new(vec![story("US-001", 1), story("US-002", 2)]);
    let tools = tempfile::TempDir::new().expect("temp dir");
    let script = tools.path().join("worker.sh");
    fs::write(
        &script,
        "#!/bin/sh\n\
         id=$(printf '%s\\n' \"$1\" | sed -n 's/^## Story \\([^:]*\\):.*/\\1/p' | head -n 1)\n\
         echo \"$id\" > \"$id.txt\"\n\
         git add \"$id.txt\"\n\
         git commit -q -m \"feat: $id - done\"\n",
    )
    .expect("write script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

    ralphswarm_cmd()
        .arg("--repo")
        .arg(&repo.root)
        .arg("--no-color")
        .args(["run", BACKLOG, "--parallel", "2"])
        .env("RALPH_AGENT_COMMAND", script.to_string_lossy().to_string())
        .env("RALPH_BATCH_PAUSE_MS", "0")
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("2/2 stories complete"));

    assert!(repo.root.join("US-001.txt").exists());
    assert!(repo.root.join("US-002.txt").exists());
    let runs = repo.root.join(".ralph/evidence/runs");
    assert_eq!(fs::read_dir(runs).expect("runs").count(), 1);
}

#[test]
fn test_run_stops_at_batch_limit_with_remaining_stories() {
    let repo = TestRepo::new(vec![story("US-001", 1)]);

    // `true` succeeds without committing, so the story never completes.
    ralphswarm_cmd()
        .arg("--repo")
        .arg(&repo.root)
        .args(["run", BACKLOG, "--max-batches", "1"])
        .env("RALPH_AGENT_COMMAND", "true")
        .env("RALPH_BATCH_PAUSE_MS", "0")
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Remaining: US-001"));
}

#[test]
fn test_run_without_any_workspace_prints_partial_summary() {
    let repo = TestRepo::new(vec![story("US-001", 1), story("US-002", 2)]);
    fs::write(repo.root.join(".ralph/worktrees"), "not a directory").expect("write");

    ralphswarm_cmd()
        .arg("--repo")
        .arg(&repo.root)
        .args(["run", BACKLOG])
        .env("RALPH_AGENT_COMMAND", "true")
        .env("RALPH_BATCH_PAUSE_MS", "0")
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no workspace could be materialized in batch 1"))
        .stdout(predicate::str::contains("0/2 stories complete after 1 batch(es)"))
        .stdout(predicate::str::contains("Remaining: US-001, US-002"));
}
