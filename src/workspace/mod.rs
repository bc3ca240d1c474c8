//! Workspace lifecycle: one git worktree plus one branch per story.
//!
//! Paths and branch names are derived deterministically from
//! `(backlog, story id)`, so a workspace left behind by an earlier run is
//! found and reused instead of duplicated.

pub mod sync;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::backlog::{BacklogError, BacklogStore, Story, WorkspaceRecord};
use crate::git::Git;

pub use sync::{NonFatal, WorkspaceManifest};

const WORKTREES_DIR_NAME: &str = "worktrees";
const MANIFEST_FILE_NAME: &str = "workspace.json";
const BRANCH_PREFIX: &str = "ralph";
const SLUG_DIGEST_BYTES: usize = 4;

/// Errors that can occur while materializing or tearing down a workspace.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// A directory occupies the workspace path but is not a worktree and
    /// could not be removed.
    #[error("failed to remove invalid workspace at {path}: {source}")]
    RemoveStale { path: PathBuf, source: io::Error },

    /// The workspace directory could not be deleted during teardown.
    #[error("failed to delete workspace at {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    /// IO error preparing the workspaces directory.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// `git worktree add` failed.
    #[error("git worktree add failed for {branch}: {message}")]
    Git { branch: String, message: String },

    /// Recording the workspace in the backlog failed.
    #[error(transparent)]
    Backlog(#[from] BacklogError),
}

/// A materialized workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub story_id: String,
    pub path: PathBuf,
    pub branch: String,
    /// The worktree already existed and was reused.
    pub reused: bool,
}

/// Creates, reuses and removes per-story worktrees.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    repo_root: PathBuf,
    state_dir: PathBuf,
    git: Git,
    store: BacklogStore,
    sync_paths: Vec<PathBuf>,
}

impl WorkspaceManager {
    /// # Arguments
    ///
    /// * `repo_root` - main repository working directory
    /// * `state_dir` - state directory relative to the repository root
    /// * `sync_paths` - shared files (relative to the repository root) copied
    ///   into every workspace
    pub fn new(
        repo_root: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        git: Git,
        store: BacklogStore,
        sync_paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            state_dir: state_dir.into(),
            git,
            store,
            sync_paths,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.repo_root.join(&self.state_dir).join(WORKTREES_DIR_NAME)
    }

    /// Deterministic workspace directory for a story.
    pub fn workspace_path(&self, backlog_name: &str, story_id: &str) -> PathBuf {
        self.worktrees_dir()
            .join(slug(backlog_name))
            .join(slug(story_id))
    }

    /// Deterministic branch name for a story.
    pub fn branch_name(backlog_name: &str, story_id: &str) -> String {
        format!("{}/{}/{}", BRANCH_PREFIX, slug(backlog_name), slug(story_id))
    }

    /// Create or reuse the workspace for `story`.
    ///
    /// New branches start from `base`. An existing branch (left by a run that
    /// was torn down before merging) is reattached so its commits survive.
    pub async fn materialize(
        &self,
        backlog_name: &str,
        story: &Story,
        base: &str,
    ) -> Result<Workspace, WorkspaceError> {
        let path = self.workspace_path(backlog_name, &story.id);
        let branch = Self::branch_name(backlog_name, &story.id);

        self.ensure_local_exclude().await.log(&story.id);

        if path.exists() {
            if self.git.is_worktree(&path).await {
                tracing::debug!(story_id = %story.id, path = %path.display(), "reusing workspace");
                self.sync_shared_files(backlog_name, &path).log(&story.id);
                self.store.track_workspace(
                    backlog_name,
                    WorkspaceRecord::running(&story.id, &branch, &path),
                )?;
                return Ok(Workspace {
                    story_id: story.id.clone(),
                    path,
                    branch,
                    reused: true,
                });
            }

            tracing::warn!(story_id = %story.id, path = %path.display(), "removing invalid workspace directory");
            fs::remove_dir_all(&path).map_err(|source| WorkspaceError::RemoveStale {
                path: path.clone(),
                source,
            })?;
            // Drop any registration still pointing at the deleted directory.
            self.git.worktree_prune(&self.repo_root).await;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let output = if self.git.branch_exists(&self.repo_root, &branch).await {
            tracing::info!(story_id = %story.id, branch = %branch, "attaching workspace to existing branch");
            self.git
                .worktree_add_existing(&self.repo_root, &path, &branch)
                .await
        } else {
            tracing::info!(story_id = %story.id, branch = %branch, base, "creating workspace");
            self.git
                .worktree_add_new(&self.repo_root, &path, &branch, base)
                .await
        };
        if !output.success() {
            return Err(WorkspaceError::Git {
                branch,
                message: output.message(),
            });
        }

        let mut report = sync::write_manifest(
            &path.join(&self.state_dir).join(MANIFEST_FILE_NAME),
            &WorkspaceManifest {
                backlog: backlog_name.to_string(),
                story_id: story.id.clone(),
                branch: branch.clone(),
                created_at: Utc::now(),
            },
        );
        report.merge(self.sync_shared_files(backlog_name, &path));
        report.log(&story.id);

        self.store.track_workspace(
            backlog_name,
            WorkspaceRecord::running(&story.id, &branch, &path),
        )?;

        Ok(Workspace {
            story_id: story.id.clone(),
            path,
            branch,
            reused: false,
        })
    }

    /// Remove the workspace for a story. Succeeds if it is already gone.
    ///
    /// The story branch is left in place; deleting it is the merge
    /// coordinator's call.
    pub async fn teardown(&self, backlog_name: &str, story_id: &str) -> Result<(), WorkspaceError> {
        let path = self.workspace_path(backlog_name, story_id);

        let output = self.git.worktree_remove(&self.repo_root, &path).await;
        if !output.success() {
            tracing::debug!(story_id, error = %output.message(), "git worktree remove failed");
        }

        if path.exists() {
            fs::remove_dir_all(&path).map_err(|source| WorkspaceError::Remove {
                path: path.clone(),
                source,
            })?;
        }

        let output = self.git.worktree_prune(&self.repo_root).await;
        if !output.success() {
            tracing::debug!(story_id, error = %output.message(), "git worktree prune failed");
        }

        match self.store.untrack_workspace(backlog_name, story_id) {
            Ok(_) | Err(BacklogError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn sync_shared_files(&self, backlog_name: &str, workspace: &Path) -> NonFatal {
        let mut report = sync::copy_shared_paths(&self.repo_root, workspace, &self.sync_paths);
        match self.store.path(backlog_name) {
            Ok(source) if source.exists() => {
                let relative = source.strip_prefix(&self.repo_root).unwrap_or(&source);
                let dest = if relative.is_absolute() {
                    workspace
                        .join(&self.state_dir)
                        .join("backlogs")
                        .join(source.file_name().unwrap_or_default())
                } else {
                    workspace.join(relative)
                };
                report.merge(sync::copy_file(&source, &dest));
            }
            Ok(_) => {}
            Err(err) => report.record("locate backlog", err),
        }
        report
    }

    /// Keep the state directory out of every branch by listing it in the
    /// shared `info/exclude`.
    async fn ensure_local_exclude(&self) -> NonFatal {
        let mut report = NonFatal::new();
        let Some(common_dir) = self.git.common_dir(&self.repo_root).await else {
            report.record("locate git common dir", "git rev-parse failed");
            return report;
        };

        let exclude_path = common_dir.join("info").join("exclude");
        let entry = format!("/{}/", self.state_dir.display());
        let existing = fs::read_to_string(&exclude_path).unwrap_or_default();
        if existing.lines().any(|line| line.trim() == entry) {
            return report;
        }

        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&entry);
        content.push('\n');

        let result = exclude_path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&exclude_path, content));
        if let Err(err) = result {
            report.record(format!("update {}", exclude_path.display()), err);
        }
        report
    }
}

/// Filesystem- and ref-safe form of an identifier.
///
/// Identifiers that are already lowercase and safe are used as-is. Anything
/// else gets a digest of the original appended, so `US.1`, `US-1` and `us-1`
/// never share a workspace or branch, even on case-insensitive filesystems.
pub fn slug(id: &str) -> String {
    let readable: String = id
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let readable = readable.trim_matches('-');
    if readable == id {
        return readable.to_string();
    }

    let digest = Sha256::digest(id.as_bytes());
    let suffix = hex::encode(&digest[..SLUG_DIGEST_BYTES]);
    if readable.is_empty() {
        format!("story-{}", suffix)
    } else {
        format!("{}-{}", readable, suffix)
    }
}
