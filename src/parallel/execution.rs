//! Execution phase: run the worker in every workspace of a batch at once.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::agent::prompt::task_description;
use crate::agent::{run_with_deadline, AgentError, AgentOutcome, AgentRunner};
use crate::backlog::BacklogStore;
use crate::error::{ErrorCategory, RecoverableMatcher};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::workspace::{Workspace, WorkspaceManager};

/// How one worker invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success(Option<String>),
    Failed(ErrorCategory),
}

impl ExecutionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionStatus::Success(_) => "success",
            ExecutionStatus::Failed(category) => category.label(),
        }
    }

    /// Success or recoverable-partial: the story goes on to completion detection.
    pub fn proceeds_to_merge(&self) -> bool {
        match self {
            ExecutionStatus::Success(_) => true,
            ExecutionStatus::Failed(category) => category.proceeds_to_merge(),
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            ExecutionStatus::Success(message) => message.clone(),
            ExecutionStatus::Failed(category) => Some(category.message().to_string()),
        }
    }
}

/// Result of running the worker in one workspace.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub workspace: Workspace,
    pub status: ExecutionStatus,
}

/// Runs one batch of workers concurrently and classifies their outcomes.
#[derive(Clone)]
pub struct ExecutionPhase {
    backlog_name: String,
    store: BacklogStore,
    workspaces: WorkspaceManager,
    worker: Arc<dyn AgentRunner>,
    matcher: RecoverableMatcher,
    worker_timeout: Duration,
}

impl ExecutionPhase {
    pub fn new(
        backlog_name: impl Into<String>,
        store: BacklogStore,
        workspaces: WorkspaceManager,
        worker: Arc<dyn AgentRunner>,
        matcher: RecoverableMatcher,
        worker_timeout: Duration,
    ) -> Self {
        Self {
            backlog_name: backlog_name.into(),
            store,
            workspaces,
            worker,
            matcher,
            worker_timeout,
        }
    }

    /// Run the worker in every workspace and wait for all of them.
    ///
    /// One worker failing never cancels the others. Results come back in the
    /// order of `batch`. Workspaces whose worker failed fatally are torn down
    /// (their branch is kept).
    pub async fn run(
        &self,
        batch: Vec<Workspace>,
        progress: &dyn ProgressSink,
    ) -> Vec<ExecutionResult> {
        let handles: Vec<_> = batch
            .iter()
            .map(|workspace| {
                let phase = self.clone();
                let workspace = workspace.clone();
                tokio::spawn(async move { phase.execute(&workspace).await })
            })
            .collect();

        let joined = join_all(handles).await;

        let mut results = Vec::with_capacity(batch.len());
        for (workspace, joined) in batch.into_iter().zip(joined) {
            let status = match joined {
                Ok(status) => status,
                Err(err) => ExecutionStatus::Failed(ErrorCategory::Fatal(
                    AgentError::Crashed(err.to_string()).to_string(),
                )),
            };

            progress.emit(&ProgressEvent::StoryExecuted {
                story_id: workspace.story_id.clone(),
                status: status.label().to_string(),
                message: status.message(),
            });

            if !status.proceeds_to_merge() {
                tracing::warn!(
                    story_id = %workspace.story_id,
                    status = status.label(),
                    error = status.message().unwrap_or_default(),
                    "worker failed; tearing down workspace"
                );
                if let Err(err) = self
                    .workspaces
                    .teardown(&self.backlog_name, &workspace.story_id)
                    .await
                {
                    tracing::warn!(story_id = %workspace.story_id, error = %err, "teardown failed");
                }
            }

            results.push(ExecutionResult { workspace, status });
        }
        results
    }

    async fn execute(&self, workspace: &Workspace) -> ExecutionStatus {
        // Re-read so counters reflect merges from earlier batches.
        let backlog = match self.store.load(&self.backlog_name) {
            Ok(backlog) => backlog,
            Err(err) => return ExecutionStatus::Failed(ErrorCategory::Fatal(err.to_string())),
        };
        let Some(story) = backlog.story(&workspace.story_id) else {
            return ExecutionStatus::Failed(ErrorCategory::Fatal(format!(
                "story {} is no longer in the backlog",
                workspace.story_id
            )));
        };
        let task = task_description(&backlog, story);

        tracing::info!(story_id = %story.id, path = %workspace.path.display(), "starting worker");
        match run_with_deadline(
            self.worker.as_ref(),
            &workspace.path,
            &task,
            self.worker_timeout,
        )
        .await
        {
            Ok(AgentOutcome::Success { message }) => ExecutionStatus::Success(message),
            Ok(AgentOutcome::Error { message }) => {
                ExecutionStatus::Failed(self.matcher.classify(&message))
            }
            Err(err @ AgentError::Timeout(_)) => {
                ExecutionStatus::Failed(ErrorCategory::Timeout(err.to_string()))
            }
            Err(err @ AgentError::Crashed(_)) => {
                ExecutionStatus::Failed(ErrorCategory::Fatal(err.to_string()))
            }
        }
    }
}
