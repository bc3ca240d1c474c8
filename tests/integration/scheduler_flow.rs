use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ralphswarm::evidence::EvidenceWriter;
use ralphswarm::parallel::{FailureStage, MAX_PARALLELISM};
use ralphswarm::{AgentOutcome, ProgressEvent, RunError, WorkspaceManager};

use crate::common::{
    commit_file, completing_worker, git, story, workspace_story_id, Recorder, ScriptedAgent,
    TestRepo, BACKLOG,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_stories_with_parallelism_two_run_in_two_batches() {
    let repo = TestRepo::new(vec![story("US-003", 3), story("US-001", 1), story("US-002", 2)]);
    let recorder = Arc::new(Recorder::default());

    let summary = repo
        .scheduler(2, completing_worker())
        .with_progress(recorder.clone())
        .run()
        .await
        .expect("run");

    assert_eq!(
        recorder.batches(),
        vec![
            vec!["US-001".to_string(), "US-002".to_string()],
            vec!["US-003".to_string()],
        ]
    );
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.total, 3);
    assert!(summary.all_passed());
    assert!(summary.failures.is_empty());

    for id in ["US-001", "US-002", "US-003"] {
        assert!(repo.root.join(format!("{}.txt", id)).exists());
        assert!(!repo.workspace_path(id).exists());
    }
    assert!(repo.backlog().tracked_workspaces.is_empty());
    assert_eq!(git(&repo.root, &["branch", "--list", "ralph/*"]), "");
    assert_eq!(git(&repo.root, &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requested_parallelism_above_cap_yields_cap() {
    let stories = (1..=7).map(|i| story(&format!("US-00{}", i), i)).collect();
    let repo = TestRepo::new(stories);
    let recorder = Arc::new(Recorder::default());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (running.clone(), peak.clone());
    let worker = ScriptedAgent::new(move |dir, _task| {
        let now = r.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(100));
        let id = workspace_story_id(dir);
        commit_file(dir, &format!("{}.txt", id), &id, &format!("feat: {} - done", id));
        r.fetch_sub(1, Ordering::SeqCst);
        AgentOutcome::success()
    });

    let scheduler = repo.scheduler(10, worker).with_progress(recorder.clone());
    assert_eq!(scheduler.parallelism(), MAX_PARALLELISM);
    let summary = scheduler.run().await.expect("run");

    let batches = recorder.batches();
    assert_eq!(batches[0].len(), MAX_PARALLELISM);
    assert_eq!(batches[1], vec!["US-006".to_string(), "US-007".to_string()]);
    assert!(peak.load(Ordering::SeqCst) <= MAX_PARALLELISM);
    assert_eq!(summary.completed, 7);
}

#[tokio::test]
async fn worker_without_completion_commit_leaves_workspace_for_next_cycle() {
    let repo = TestRepo::new(vec![story("US-001", 1)]);
    let worker = ScriptedAgent::new(|dir, _task| {
        commit_file(dir, "wip.txt", "half", "wip: still going");
        AgentOutcome::success()
    });
    let summary = repo
        .scheduler_with(2, Some(1), worker)
        .run()
        .await
        .expect("run");

    assert_eq!(summary.remaining, vec!["US-001".to_string()]);
    assert!(summary.failures.is_empty());
    assert!(repo.workspace_path("US-001").join("wip.txt").exists());
    assert!(repo.backlog().workspace("US-001").is_some());
}

#[tokio::test]
async fn second_cycle_reuses_workspace_and_finishes() {
    let repo = TestRepo::new(vec![story("US-001", 1)]);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let worker = ScriptedAgent::new(move |dir, _task| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            commit_file(dir, "part1.txt", "1", "wip: part one");
        } else {
            assert!(dir.join("part1.txt").exists(), "workspace was not reused");
            commit_file(dir, "part2.txt", "2", "feat: US-001 - finished");
        }
        AgentOutcome::success()
    });

    let summary = repo.scheduler(1, worker).run().await.expect("run");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.batches, 2);
    assert!(summary.all_passed());
    assert!(repo.root.join("part1.txt").exists());
    assert!(repo.root.join("part2.txt").exists());
}

#[tokio::test]
async fn unresolved_conflict_keeps_trunk_clean_and_story_pending() {
    let repo = TestRepo::new(vec![story("US-001", 1), story("US-002", 2)]);
    let worker = ScriptedAgent::new(|dir, _task| {
        let id = workspace_story_id(dir);
        commit_file(dir, "README.md", &format!("{}\n", id), &format!("feat: {} - readme", id));
        AgentOutcome::success()
    });
    let resolver = ScriptedAgent::new(|_dir, _task| AgentOutcome::error("cannot resolve"));

    let summary = repo
        .scheduler_with(2, Some(1), worker)
        .with_resolver(resolver)
        .run()
        .await
        .expect("run");

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.remaining, vec!["US-002".to_string()]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].story_id, "US-002");
    assert_eq!(summary.failures[0].stage, FailureStage::Merge);
    assert!(summary.failures[0].message.contains("cannot resolve"));

    assert_eq!(git(&repo.root, &["status", "--porcelain", "--untracked-files=no"]), "");
    assert_eq!(
        std::fs::read_to_string(repo.root.join("README.md")).expect("read"),
        "US-001\n"
    );
    assert!(repo.workspace_path("US-002").exists());
    let backlog = repo.backlog();
    assert!(!backlog.story("US-002").expect("story").passes);
    assert!(backlog.workspace("US-002").is_some());
}

#[tokio::test]
async fn resolver_that_commits_completes_the_merge() {
    let repo = TestRepo::new(vec![story("US-001", 1), story("US-002", 2)]);
    let worker = ScriptedAgent::new(|dir, _task| {
        let id = workspace_story_id(dir);
        commit_file(dir, "README.md", &format!("{}\n", id), &format!("feat: {} - readme", id));
        AgentOutcome::success()
    });
    let resolver = ScriptedAgent::new(|dir, task| {
        assert!(task.contains("US-002"));
        std::fs::write(dir.join("README.md"), "US-001\nUS-002\n").expect("write");
        git(dir, &["add", "README.md"]);
        git(dir, &["commit", "-q", "--no-edit"]);
        AgentOutcome::success()
    });

    let summary = repo
        .scheduler(2, worker)
        .with_resolver(resolver)
        .run()
        .await
        .expect("run");

    assert!(summary.all_passed());
    assert_eq!(
        std::fs::read_to_string(repo.root.join("README.md")).expect("read"),
        "US-001\nUS-002\n"
    );
    assert!(!repo.workspace_path("US-002").exists());
}

#[tokio::test]
async fn fatal_worker_error_tears_down_workspace_but_keeps_branch() {
    let repo = TestRepo::new(vec![story("US-001", 1), story("US-002", 2)]);
    let worker = ScriptedAgent::new(|dir, _task| {
        let id = workspace_story_id(dir);
        if id == "US-002" {
            return AgentOutcome::error("context window exceeded");
        }
        commit_file(dir, "a.txt", "a", "feat: US-001 - a");
        AgentOutcome::success()
    });

    let summary = repo
        .scheduler_with(2, Some(1), worker)
        .run()
        .await
        .expect("run");

    assert_eq!(summary.remaining, vec!["US-002".to_string()]);
    assert_eq!(summary.failures[0].stage, FailureStage::Execution);
    assert_eq!(summary.failures[0].message, "context window exceeded");
    assert!(!repo.workspace_path("US-002").exists());
    let branch = WorkspaceManager::branch_name(BACKLOG, "US-002");
    assert_eq!(git(&repo.root, &["branch", "--list", &branch]), branch);
}

#[tokio::test]
async fn recoverable_worker_error_still_merges_committed_work() {
    let repo = TestRepo::new(vec![story("US-001", 1)]);
    let worker = ScriptedAgent::new(|dir, _task| {
        commit_file(dir, "a.txt", "a", "feat: US-001 - a");
        AgentOutcome::error("No such tool available: mcp__browser__open")
    });

    let summary = repo.scheduler(1, worker).run().await.expect("run");

    assert!(summary.all_passed());
    assert!(summary.failures.is_empty());
}

#[tokio::test]
async fn zero_materialized_workspaces_halts_the_run() {
    let repo = TestRepo::new(vec![story("US-001", 1), story("US-002", 2)]);
    // A file where the worktrees directory should be makes every materialization fail.
    std::fs::write(repo.root.join(".ralph/worktrees"), "not a directory").expect("write");

    let recorder = Arc::new(Recorder::default());

    let result = repo
        .scheduler(2, completing_worker())
        .with_progress(recorder.clone())
        .run()
        .await;

    match result {
        Err(RunError::NoProgress {
            batch,
            failures,
            summary,
        }) => {
            assert_eq!(batch, 1);
            let ids: Vec<_> = failures.iter().map(|(id, _)| id.as_str()).collect();
            assert_eq!(ids, vec!["US-001", "US-002"]);
            assert_eq!(summary.batches, 1);
            assert_eq!(summary.completed, 0);
            assert_eq!(summary.total, 2);
            assert_eq!(summary.remaining, vec!["US-001".to_string(), "US-002".to_string()]);
            assert!(summary
                .failures
                .iter()
                .all(|f| f.stage == FailureStage::Workspace));
        }
        other => panic!("expected NoProgress, got {:?}", other),
    }
    assert!(matches!(
        recorder.events().last(),
        Some(ProgressEvent::RunFinished { total: 2, .. })
    ));
}

#[tokio::test]
async fn missing_backlog_is_reported() {
    let repo = TestRepo::new(vec![story("US-001", 1)]);
    let mut config = ralphswarm::SchedulerConfig::new("nope");
    config.parallelism = 1;
    let scheduler = ralphswarm::BatchScheduler::new(
        config,
        repo.store.clone(),
        repo.workspaces(),
        repo.git.clone(),
        completing_worker(),
    );

    let result = scheduler.run().await;

    assert!(matches!(result, Err(RunError::BacklogNotFound(ref name)) if name == "nope"));
}

#[tokio::test]
async fn stop_flag_ends_run_at_batch_boundary() {
    let repo = TestRepo::new(vec![story("US-001", 1), story("US-002", 2)]);
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let worker = ScriptedAgent::new(move |dir, _task| {
        let id = workspace_story_id(dir);
        commit_file(dir, "a.txt", &id, &format!("feat: {} - a", id));
        flag.store(true, Ordering::SeqCst);
        AgentOutcome::success()
    });

    let summary = repo
        .scheduler(1, worker)
        .with_stop_flag(stop)
        .run()
        .await
        .expect("run");

    // The batch in flight finishes, including its merge.
    assert!(summary.stopped);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.remaining, vec!["US-002".to_string()]);
}

#[tokio::test]
async fn run_evidence_records_every_step() {
    let repo = TestRepo::new(vec![story("US-001", 1)]);
    let writer = Arc::new(
        EvidenceWriter::try_new(&repo.root.join(".ralph"), "run-test", "shop").expect("writer"),
    );

    repo.scheduler(1, completing_worker())
        .with_progress(writer.clone())
        .run()
        .await
        .expect("run");

    let records = writer.store().read_records("run-test").expect("records");
    let events: Vec<_> = records
        .iter()
        .filter_map(|r| r.payload["event"].as_str().map(str::to_string))
        .collect();
    assert_eq!(events.first().map(String::as_str), Some("run_started"));
    assert_eq!(events.last().map(String::as_str), Some("run_finished"));
    assert!(events.iter().any(|e| e == "merged"));
    let metadata = writer
        .store()
        .read_metadata("run-test")
        .expect("metadata")
        .expect("present");
    assert_eq!(metadata.record_count as usize, records.len());
}
