//! Batch scheduler: the top-level control loop of a backlog run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::agent::AgentRunner;
use crate::backlog::{Backlog, BacklogError, BacklogStore, Story};
use crate::error::{RecoverableMatcher, RunError};
use crate::git::Git;
use crate::parallel::execution::ExecutionPhase;
use crate::parallel::merge::MergeCoordinator;
use crate::progress::{NoProgress, ProgressEvent, ProgressSink};
use crate::timeout::TimeoutConfig;
use crate::workspace::WorkspaceManager;

/// Batch size used when none is requested.
pub const DEFAULT_PARALLELISM: usize = 2;

/// Hard ceiling on concurrent workers, regardless of the requested value.
pub const MAX_PARALLELISM: usize = 5;

/// Clamp a requested batch size to `1..=MAX_PARALLELISM`; zero means the default.
pub fn clamp_parallelism(requested: usize) -> usize {
    if requested == 0 {
        DEFAULT_PARALLELISM
    } else {
        requested.min(MAX_PARALLELISM)
    }
}

/// The next batch: the first `parallelism` pending stories in priority order.
pub fn select_batch(backlog: &Backlog, parallelism: usize) -> Vec<Story> {
    backlog
        .pending_stories()
        .into_iter()
        .take(clamp_parallelism(parallelism))
        .cloned()
        .collect()
}

/// Options for one backlog run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub backlog_name: String,
    /// Requested batch size; clamped with [`clamp_parallelism`].
    pub parallelism: usize,
    /// Stop after this many batches.
    pub max_batches: Option<u32>,
    /// Trunk branch; the repository's current branch when unset.
    pub trunk: Option<String>,
    pub timeouts: TimeoutConfig,
}

impl SchedulerConfig {
    pub fn new(backlog_name: impl Into<String>) -> Self {
        Self {
            backlog_name: backlog_name.into(),
            parallelism: DEFAULT_PARALLELISM,
            max_batches: None,
            trunk: None,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Phase in which a story failed during a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Workspace,
    Execution,
    Merge,
}

/// A per-story failure. The story stays pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryFailure {
    pub batch: u32,
    pub story_id: String,
    pub stage: FailureStage,
    pub message: String,
}

/// Outcome of a backlog run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub batches: u32,
    pub completed: usize,
    pub total: usize,
    /// Pending story ids in priority order.
    pub remaining: Vec<String>,
    pub failures: Vec<StoryFailure>,
    /// The run ended on a stop request.
    pub stopped: bool,
}

impl RunSummary {
    pub fn all_passed(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Drives batches until the backlog is done, no progress is possible, or a
/// stop is requested.
pub struct BatchScheduler {
    config: SchedulerConfig,
    store: BacklogStore,
    workspaces: WorkspaceManager,
    git: Git,
    worker: Arc<dyn AgentRunner>,
    resolver: Arc<dyn AgentRunner>,
    matcher: RecoverableMatcher,
    progress: Arc<dyn ProgressSink>,
    stop: Arc<AtomicBool>,
}

impl BatchScheduler {
    /// The worker also resolves conflicts unless [`with_resolver`](Self::with_resolver) is set.
    pub fn new(
        config: SchedulerConfig,
        store: BacklogStore,
        workspaces: WorkspaceManager,
        git: Git,
        worker: Arc<dyn AgentRunner>,
    ) -> Self {
        Self {
            config,
            store,
            workspaces,
            git,
            resolver: worker.clone(),
            worker,
            matcher: RecoverableMatcher::default(),
            progress: Arc::new(NoProgress),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AgentRunner>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_matcher(mut self, matcher: RecoverableMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Flag checked between batches; setting it ends the run after the
    /// current batch's merges.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn parallelism(&self) -> usize {
        clamp_parallelism(self.config.parallelism)
    }

    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let name = self.config.backlog_name.as_str();
        let repo = self.workspaces.repo_root().to_path_buf();
        let parallelism = self.parallelism();

        match self.store.drop_orphaned_workspaces(name) {
            Ok(dropped) if !dropped.is_empty() => {
                tracing::warn!(backlog = name, stories = ?dropped, "dropped workspace records for unknown stories");
            }
            Ok(_) => {}
            Err(BacklogError::NotFound(_)) => {
                return Err(RunError::BacklogNotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        }

        let trunk = match &self.config.trunk {
            Some(trunk) => trunk.clone(),
            None => self.git.current_branch(&repo).await,
        };

        let execution = ExecutionPhase::new(
            name,
            self.store.clone(),
            self.workspaces.clone(),
            self.worker.clone(),
            self.matcher.clone(),
            self.config.timeouts.worker_timeout,
        );
        let merger = MergeCoordinator::new(
            name,
            &trunk,
            self.git.clone(),
            self.store.clone(),
            self.workspaces.clone(),
            self.resolver.clone(),
            self.config.timeouts.resolution_timeout,
        );

        tracing::info!(backlog = name, parallelism, trunk = %trunk, "starting run");
        self.progress.emit(&ProgressEvent::RunStarted {
            backlog: name.to_string(),
            parallelism,
            trunk: trunk.clone(),
        });

        let mut summary = RunSummary::default();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!(backlog = name, "stop requested; ending run");
                summary.stopped = true;
                break;
            }
            if let Some(max) = self.config.max_batches {
                if summary.batches >= max {
                    tracing::info!(backlog = name, max_batches = max, "batch limit reached");
                    break;
                }
            }

            let backlog = match self.store.load(name) {
                Ok(backlog) => backlog,
                Err(BacklogError::NotFound(_)) => {
                    tracing::warn!(backlog = name, "backlog disappeared; ending run");
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            let batch = select_batch(&backlog, parallelism);
            if batch.is_empty() {
                tracing::info!(backlog = name, "no pending stories");
                break;
            }

            summary.batches += 1;
            let batch_number = summary.batches;
            if let Err(failures) = self
                .run_batch(batch_number, &batch, &trunk, &execution, &merger, &mut summary)
                .await
            {
                self.finish_run(&mut summary);
                return Err(RunError::NoProgress {
                    batch: batch_number,
                    failures,
                    summary: Box::new(summary),
                });
            }

            tokio::time::sleep(self.config.timeouts.batch_pause).await;
        }

        self.finish_run(&mut summary);
        Ok(summary)
    }

    /// Fill in the final backlog state and announce the end of the run.
    fn finish_run(&self, summary: &mut RunSummary) {
        let name = self.config.backlog_name.as_str();
        match self.store.load(name) {
            Ok(backlog) => {
                summary.completed = backlog.completed_count();
                summary.total = backlog.stories.len();
                summary.remaining = backlog
                    .pending_stories()
                    .into_iter()
                    .map(|s| s.id.clone())
                    .collect();
            }
            Err(err) => tracing::warn!(backlog = name, error = %err, "could not read final backlog state"),
        }

        self.progress.emit(&ProgressEvent::RunFinished {
            completed: summary.completed,
            total: summary.total,
            remaining: summary.remaining.clone(),
        });
    }

    /// Materialize, execute and merge one batch. Fails with the per-story
    /// workspace errors when not a single workspace could be materialized.
    async fn run_batch(
        &self,
        batch_number: u32,
        batch: &[Story],
        trunk: &str,
        execution: &ExecutionPhase,
        merger: &MergeCoordinator,
        summary: &mut RunSummary,
    ) -> Result<(), Vec<(String, String)>> {
        let name = self.config.backlog_name.as_str();
        let progress = self.progress.as_ref();

        tracing::info!(batch = batch_number, stories = batch.len(), "starting batch");
        progress.emit(&ProgressEvent::BatchStarted {
            batch: batch_number,
            story_ids: batch.iter().map(|s| s.id.clone()).collect(),
        });

        let mut ready = Vec::with_capacity(batch.len());
        let mut workspace_failures = Vec::new();
        for story in batch {
            match self.workspaces.materialize(name, story, trunk).await {
                Ok(workspace) => {
                    progress.emit(&ProgressEvent::WorkspaceReady {
                        story_id: story.id.clone(),
                        branch: workspace.branch.clone(),
                        reused: workspace.reused,
                    });
                    ready.push(workspace);
                }
                Err(err) => {
                    tracing::warn!(batch = batch_number, story_id = %story.id, error = %err, "workspace failed");
                    progress.emit(&ProgressEvent::WorkspaceFailed {
                        story_id: story.id.clone(),
                        error: err.to_string(),
                    });
                    workspace_failures.push((story.id.clone(), err.to_string()));
                }
            }
        }

        summary
            .failures
            .extend(workspace_failures.iter().map(|(story_id, message)| StoryFailure {
                batch: batch_number,
                story_id: story_id.clone(),
                stage: FailureStage::Workspace,
                message: message.clone(),
            }));
        if ready.is_empty() {
            return Err(workspace_failures);
        }

        let results = execution.run(ready, progress).await;

        for result in results {
            if !result.status.proceeds_to_merge() {
                summary.failures.push(StoryFailure {
                    batch: batch_number,
                    story_id: result.workspace.story_id.clone(),
                    stage: FailureStage::Execution,
                    message: result.status.message().unwrap_or_default(),
                });
                continue;
            }

            let Some(story) = batch.iter().find(|s| s.id == result.workspace.story_id) else {
                continue;
            };
            let outcome = merger.merge_story(story, &result.workspace, progress).await;
            if let Some(message) = outcome.failure() {
                summary.failures.push(StoryFailure {
                    batch: batch_number,
                    story_id: story.id.clone(),
                    stage: FailureStage::Merge,
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }
}
