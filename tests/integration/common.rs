use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ralphswarm::backlog::{Backlog, BacklogStore, Story};
use ralphswarm::git::Git;
use ralphswarm::parallel::{BatchScheduler, SchedulerConfig};
use ralphswarm::progress::{ProgressEvent, ProgressSink};
use ralphswarm::timeout::TimeoutConfig;
use ralphswarm::{AgentOutcome, AgentRunner, WorkspaceManager};
use tempfile::TempDir;

pub const BACKLOG: &str = "shop";

pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

pub fn commit_file(dir: &Path, file: &str, content: &str, message: &str) {
    std::fs::write(dir.join(file), content).expect("write file");
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
}

pub fn story(id: &str, priority: i64) -> Story {
    Story {
        id: id.to_string(),
        title: format!("Build {}", id),
        description: String::new(),
        acceptance_criteria: vec!["Done".to_string()],
        priority,
        passes: false,
        notes: String::new(),
    }
}

/// Story id of the workspace the worker runs in, from its manifest.
pub fn workspace_story_id(dir: &Path) -> String {
    let manifest = std::fs::read_to_string(dir.join(".ralph/workspace.json")).expect("manifest");
    let value: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    value["storyId"].as_str().expect("storyId").to_string()
}

pub struct TestRepo {
    _temp_dir: TempDir,
    pub root: PathBuf,
    pub store: BacklogStore,
    pub git: Git,
}

impl TestRepo {
    /// Repository on `main` holding one commit and a backlog of the given stories.
    pub fn new(stories: Vec<Story>) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path().join("repo");
        std::fs::create_dir_all(&root).expect("mkdir");
        git(&root, &["init", "-q"]);
        git(&root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&root, &["config", "user.name", "Ralph"]);
        git(&root, &["config", "user.email", "ralph@example.com"]);
        git(&root, &["config", "commit.gpgsign", "false"]);
        commit_file(&root, "README.md", "shop\n", "init");

        let store = BacklogStore::for_repo(&root, Path::new(".ralph"));
        let mut backlog = Backlog::new("Shop", "A small shop");
        backlog.stories = stories;
        store.save(BACKLOG, &mut backlog).expect("save backlog");

        Self {
            _temp_dir: temp_dir,
            root,
            store,
            git: Git::new(Duration::from_secs(30)),
        }
    }

    pub fn workspaces(&self) -> WorkspaceManager {
        WorkspaceManager::new(
            &self.root,
            ".ralph",
            self.git.clone(),
            self.store.clone(),
            vec![],
        )
    }

    pub fn scheduler(&self, parallelism: usize, worker: Arc<dyn AgentRunner>) -> BatchScheduler {
        self.scheduler_with(parallelism, None, worker)
    }

    pub fn scheduler_with(
        &self,
        parallelism: usize,
        max_batches: Option<u32>,
        worker: Arc<dyn AgentRunner>,
    ) -> BatchScheduler {
        let mut config = SchedulerConfig::new(BACKLOG);
        config.parallelism = parallelism;
        config.max_batches = max_batches;
        config.timeouts = TimeoutConfig::default()
            .with_worker_timeout(Duration::from_secs(30))
            .with_resolution_timeout(Duration::from_secs(30))
            .with_batch_pause(Duration::ZERO);
        BatchScheduler::new(config, self.store.clone(), self.workspaces(), self.git.clone(), worker)
    }

    pub fn backlog(&self) -> Backlog {
        self.store.load(BACKLOG).expect("load backlog")
    }

    pub fn workspace_path(&self, story_id: &str) -> PathBuf {
        self.workspaces().workspace_path(BACKLOG, story_id)
    }
}

/// Worker backed by a closure over `(workspace dir, task)`.
pub struct ScriptedAgent<F> {
    script: F,
}

impl<F> ScriptedAgent<F>
where
    F: Fn(&Path, &str) -> AgentOutcome + Send + Sync + 'static,
{
    pub fn new(script: F) -> Arc<Self> {
        Arc::new(Self { script })
    }
}

#[async_trait]
impl<F> AgentRunner for ScriptedAgent<F>
where
    F: Fn(&Path, &str) -> AgentOutcome + Send + Sync + 'static,
{
    async fn run(&self, working_dir: &Path, task: &str) -> AgentOutcome {
        (self.script)(working_dir, task)
    }
}

/// Worker that finishes every story with a completion commit touching `<id>.txt`.
pub fn completing_worker() -> Arc<dyn AgentRunner> {
    ScriptedAgent::new(|dir, _task| {
        let id = workspace_story_id(dir);
        commit_file(dir, &format!("{}.txt", id), &id, &format!("feat: {} - done", id));
        AgentOutcome::success()
    })
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<ProgressEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("lock").clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::BatchStarted { story_ids, .. } => Some(story_ids),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for Recorder {
    fn emit(&self, event: &ProgressEvent) {
        self.events.lock().expect("lock").push(event.clone());
    }
}
