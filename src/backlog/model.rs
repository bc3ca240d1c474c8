//! Backlog document shapes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One prioritized, independently completable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    /// Unique within the backlog.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Lower is more urgent.
    pub priority: i64,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub notes: String,
}

/// Lifecycle of a tracked workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Running,
    Merged,
}

/// A materialized workspace, persisted so work survives process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    pub story_id: String,
    pub branch_name: String,
    pub workspace_path: PathBuf,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
}

impl WorkspaceRecord {
    pub fn running(
        story_id: impl Into<String>,
        branch_name: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            story_id: story_id.into(),
            branch_name: branch_name.into(),
            workspace_path: workspace_path.into(),
            status: WorkspaceStatus::Running,
            created_at: Utc::now(),
        }
    }
}

/// The persisted document of stories and tracked workspaces for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlog {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "userStories", default)]
    pub stories: Vec<Story>,
    #[serde(default)]
    pub tracked_workspaces: Vec<WorkspaceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Backlog {
    pub fn new(project: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            description: description.into(),
            stories: Vec::new(),
            tracked_workspaces: Vec::new(),
            updated_at: None,
        }
    }

    pub fn story(&self, story_id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == story_id)
    }

    /// Stories with `passes == false`, most urgent first.
    ///
    /// The sort is stable, so stories sharing a priority keep their
    /// declaration order.
    pub fn pending_stories(&self) -> Vec<&Story> {
        let mut pending: Vec<&Story> = self.stories.iter().filter(|s| !s.passes).collect();
        pending.sort_by_key(|s| s.priority);
        pending
    }

    pub fn completed_count(&self) -> usize {
        self.stories.iter().filter(|s| s.passes).count()
    }

    pub fn workspace(&self, story_id: &str) -> Option<&WorkspaceRecord> {
        self.tracked_workspaces
            .iter()
            .find(|w| w.story_id == story_id)
    }

    /// Insert or replace the record for `record.story_id`.
    ///
    /// Returns `true` when a new record was added. An existing record keeps
    /// its original `created_at`.
    pub fn track_workspace(&mut self, record: WorkspaceRecord) -> bool {
        match self
            .tracked_workspaces
            .iter_mut()
            .find(|w| w.story_id == record.story_id)
        {
            Some(existing) => {
                existing.branch_name = record.branch_name;
                existing.workspace_path = record.workspace_path;
                existing.status = record.status;
                false
            }
            None => {
                self.tracked_workspaces.push(record);
                true
            }
        }
    }

    /// Remove the record for `story_id`; returns whether one existed.
    pub fn untrack_workspace(&mut self, story_id: &str) -> bool {
        let before = self.tracked_workspaces.len();
        self.tracked_workspaces.retain(|w| w.story_id != story_id);
        self.tracked_workspaces.len() != before
    }

    /// Drop records whose story no longer exists. Returns the dropped ids.
    pub fn drop_orphaned_workspaces(&mut self) -> Vec<String> {
        let known: std::collections::HashSet<&str> =
            self.stories.iter().map(|s| s.id.as_str()).collect();
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tracked_workspaces)
            .into_iter()
            .partition(|w| known.contains(w.story_id.as_str()));
        self.tracked_workspaces = kept;
        dropped.into_iter().map(|w| w.story_id).collect()
    }
}

/// Return the next story to work on, if any.
pub fn next_pending_story(backlog: &Backlog) -> Option<&Story> {
    backlog.pending_stories().into_iter().next()
}
