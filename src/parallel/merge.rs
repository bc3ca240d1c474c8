//! Serial merge of finished story branches into the trunk.
//!
//! Checking out the trunk is a repository-wide operation, so merges run one
//! at a time in the main working directory. A merge left conflicted is always
//! aborted before the coordinator returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::prompt::conflict_resolution_prompt;
use crate::agent::{run_with_deadline, AgentOutcome, AgentRunner};
use crate::backlog::{BacklogStore, Story};
use crate::git::{is_conflict, Git};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::workspace::{Workspace, WorkspaceManager};

/// What happened to one story in the merge phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged into the trunk; the story is marked complete.
    Merged { resolved_by_agent: bool },
    /// No completion commit on the branch yet. Not an error.
    NotReady,
    /// The trunk could not be checked out.
    CheckoutFailed(String),
    /// Conflicts the resolver could not settle; the merge was aborted.
    ConflictUnresolved(String),
    /// The merge failed for a reason other than conflicts.
    MergeFailed(String),
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }

    /// Failure message, for outcomes that count as a per-story failure.
    pub fn failure(&self) -> Option<&str> {
        match self {
            MergeOutcome::CheckoutFailed(msg)
            | MergeOutcome::ConflictUnresolved(msg)
            | MergeOutcome::MergeFailed(msg) => Some(msg),
            MergeOutcome::Merged { .. } | MergeOutcome::NotReady => None,
        }
    }
}

/// Merges story branches into the trunk, one at a time.
pub struct MergeCoordinator {
    backlog_name: String,
    trunk: String,
    repo_root: PathBuf,
    git: Git,
    store: BacklogStore,
    workspaces: WorkspaceManager,
    resolver: Arc<dyn AgentRunner>,
    resolution_timeout: Duration,
}

impl MergeCoordinator {
    pub fn new(
        backlog_name: impl Into<String>,
        trunk: impl Into<String>,
        git: Git,
        store: BacklogStore,
        workspaces: WorkspaceManager,
        resolver: Arc<dyn AgentRunner>,
        resolution_timeout: Duration,
    ) -> Self {
        Self {
            backlog_name: backlog_name.into(),
            trunk: trunk.into(),
            repo_root: workspaces.repo_root().to_path_buf(),
            git,
            store,
            workspaces,
            resolver,
            resolution_timeout,
        }
    }

    /// Merge one story's branch if it carries a completion commit.
    ///
    /// Only a confirmed merge changes the backlog or removes the workspace;
    /// every other outcome leaves the story pending with its workspace intact.
    pub async fn merge_story(
        &self,
        story: &Story,
        workspace: &Workspace,
        progress: &dyn ProgressSink,
    ) -> MergeOutcome {
        let outcome = self.attempt(story, workspace, progress).await;
        match &outcome {
            MergeOutcome::Merged { resolved_by_agent } => {
                progress.emit(&ProgressEvent::Merged {
                    story_id: story.id.clone(),
                    resolved_by_agent: *resolved_by_agent,
                });
            }
            MergeOutcome::NotReady => {
                progress.emit(&ProgressEvent::CompletionPending {
                    story_id: story.id.clone(),
                });
            }
            failed => {
                let reason = failed.failure().unwrap_or_default().to_string();
                tracing::warn!(story_id = %story.id, branch = %workspace.branch, error = %reason, "merge failed");
                progress.emit(&ProgressEvent::MergeFailed {
                    story_id: story.id.clone(),
                    reason,
                });
            }
        }
        outcome
    }

    async fn attempt(
        &self,
        story: &Story,
        workspace: &Workspace,
        progress: &dyn ProgressSink,
    ) -> MergeOutcome {
        let repo = &self.repo_root;
        let branch = &workspace.branch;

        if !self
            .git
            .has_completion_commit(repo, branch, &story.id, &self.trunk)
            .await
        {
            tracing::info!(story_id = %story.id, branch = %branch, "no completion commit yet");
            return MergeOutcome::NotReady;
        }

        let checkout = self.git.checkout(repo, &self.trunk).await;
        if !checkout.success() {
            return MergeOutcome::CheckoutFailed(format!(
                "checkout {} failed: {}",
                self.trunk,
                checkout.message()
            ));
        }

        let merge = self.git.merge(repo, branch).await;
        if merge.success() {
            tracing::info!(story_id = %story.id, branch = %branch, "merged");
            return self.finish(story, workspace, false).await;
        }

        let conflicted = match self.git.unmerged_paths(repo).await {
            Ok(paths) => !paths.is_empty(),
            Err(_) => false,
        };
        if !is_conflict(&merge) && !conflicted {
            self.abort_if_merging(&story.id).await;
            return MergeOutcome::MergeFailed(merge.message());
        }

        progress.emit(&ProgressEvent::ConflictDetected {
            story_id: story.id.clone(),
            branch: branch.clone(),
        });
        tracing::info!(story_id = %story.id, branch = %branch, "merge conflict; invoking resolver");

        match self.resolve(story, branch).await {
            Ok(()) => self.finish(story, workspace, true).await,
            Err(reason) => {
                self.abort_if_merging(&story.id).await;
                MergeOutcome::ConflictUnresolved(reason)
            }
        }
    }

    /// Run the resolver, then verify the repository instead of trusting its report.
    async fn resolve(&self, story: &Story, branch: &str) -> Result<(), String> {
        let repo = &self.repo_root;
        let prompt = conflict_resolution_prompt(branch, story, &self.trunk);

        match run_with_deadline(self.resolver.as_ref(), repo, &prompt, self.resolution_timeout)
            .await
        {
            Ok(AgentOutcome::Success { .. }) => {}
            Ok(AgentOutcome::Error { message }) => {
                return Err(format!("conflict resolution failed: {}", message))
            }
            Err(err) => return Err(format!("conflict resolution failed: {}", err)),
        }

        let unresolved = self.git.unmerged_paths(repo).await?;
        if !unresolved.is_empty() {
            return Err(format!("unresolved paths remain: {}", unresolved.join(", ")));
        }

        if self.git.merge_in_progress(repo).await {
            let commit = self.git.commit_no_edit(repo).await;
            if !commit.success() {
                return Err(format!("concluding the merge failed: {}", commit.message()));
            }
        }

        if !self.git.is_ancestor(repo, branch, "HEAD").await {
            return Err(format!("{} was not merged into {}", branch, self.trunk));
        }
        Ok(())
    }

    /// Record the merged story as complete, then clean up its workspace and branch.
    ///
    /// If completion cannot be persisted the workspace and branch are kept and
    /// the merge is reported as failed, so the backlog never disagrees with
    /// what the run reports.
    async fn finish(
        &self,
        story: &Story,
        workspace: &Workspace,
        resolved_by_agent: bool,
    ) -> MergeOutcome {
        match self.store.mark_complete(&self.backlog_name, &story.id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(story_id = %story.id, "merged story is no longer in the backlog")
            }
            Err(err) => {
                return MergeOutcome::MergeFailed(format!(
                    "merged into {} but could not record completion: {}",
                    self.trunk, err
                ))
            }
        }

        if let Err(err) = self
            .workspaces
            .teardown(&self.backlog_name, &workspace.story_id)
            .await
        {
            tracing::warn!(story_id = %story.id, error = %err, "teardown after merge failed");
        }

        let deleted = self.git.delete_branch(&self.repo_root, &workspace.branch).await;
        if !deleted.success() {
            tracing::warn!(branch = %workspace.branch, error = %deleted.message(), "failed to delete story branch");
        }

        MergeOutcome::Merged { resolved_by_agent }
    }

    async fn abort_if_merging(&self, story_id: &str) {
        if !self.git.merge_in_progress(&self.repo_root).await {
            return;
        }
        let abort = self.git.merge_abort(&self.repo_root).await;
        if abort.success() {
            tracing::info!(story_id, "merge aborted; trunk restored");
        } else {
            tracing::error!(story_id, error = %abort.message(), "merge --abort failed; trunk may be mid-merge");
        }
    }
}
