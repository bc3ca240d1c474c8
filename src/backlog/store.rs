use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;

use crate::backlog::model::{Backlog, WorkspaceRecord, WorkspaceStatus};

const BACKLOGS_DIR_NAME: &str = "backlogs";

/// Errors that can occur during backlog storage operations.
#[derive(Error, Debug)]
pub enum BacklogError {
    /// The backlog file is missing or could not be parsed.
    #[error("backlog '{0}' not found")]
    NotFound(String),

    /// The backlog name cannot be used as a file name.
    #[error("invalid backlog name: {0:?}")]
    InvalidName(String),

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for backlog storage operations.
pub type BacklogResult<T> = Result<T, BacklogError>;

/// Filesystem-backed store of backlog documents, one `<name>.json` per backlog.
///
/// The store is the only writer of backlog files. Mutations go through
/// [`BacklogStore::update`], which serializes read-modify-persist cycles
/// across clones of the same store.
#[derive(Debug, Clone)]
pub struct BacklogStore {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl BacklogStore {
    /// Create a store that keeps backlogs directly under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store rooted at `<repo_root>/<state_dir>/backlogs`.
    pub fn for_repo(repo_root: &Path, state_dir: &Path) -> Self {
        Self::new(repo_root.join(state_dir).join(BACKLOGS_DIR_NAME))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the backlog file for `name`.
    pub fn path(&self, name: &str) -> BacklogResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.json", name)))
    }

    /// Load a backlog.
    ///
    /// A malformed document is reported as [`BacklogError::NotFound`] so
    /// callers present one "does not exist" outcome for corrupt input.
    pub fn load(&self, name: &str) -> BacklogResult<Backlog> {
        let path = self.path(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BacklogError::NotFound(name.to_string()))
            }
            Err(err) => return Err(BacklogError::Io(err)),
        };

        serde_json::from_str(&content).map_err(|err| {
            tracing::warn!(backlog = name, path = %path.display(), error = %err, "malformed backlog document");
            BacklogError::NotFound(name.to_string())
        })
    }

    /// Persist a backlog, creating the containing directory if needed.
    ///
    /// Always refreshes `updated_at`. The write goes to a temporary file that
    /// is renamed into place, so readers never observe a partial document.
    pub fn save(&self, name: &str, backlog: &mut Backlog) -> BacklogResult<()> {
        let path = self.path(name)?;
        fs::create_dir_all(&self.dir)?;

        backlog.updated_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(backlog)?;

        let temp_path = self.dir.join(format!("{}.json.tmp", name));
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    /// Read-modify-persist under the store's write lock.
    pub fn update<T>(&self, name: &str, f: impl FnOnce(&mut Backlog) -> T) -> BacklogResult<T> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut backlog = self.load(name)?;
        let result = f(&mut backlog);
        self.save(name, &mut backlog)?;
        Ok(result)
    }

    /// Mark a story as passing.
    ///
    /// Returns `false` when the backlog or the story does not exist. The
    /// story's tracked workspace, if any, moves to `merged`.
    pub fn mark_complete(&self, name: &str, story_id: &str) -> BacklogResult<bool> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut backlog = match self.load(name) {
            Ok(backlog) => backlog,
            Err(BacklogError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };

        let Some(story) = backlog.stories.iter_mut().find(|s| s.id == story_id) else {
            return Ok(false);
        };
        story.passes = true;

        if let Some(record) = backlog
            .tracked_workspaces
            .iter_mut()
            .find(|w| w.story_id == story_id)
        {
            record.status = WorkspaceStatus::Merged;
        }

        self.save(name, &mut backlog)?;
        Ok(true)
    }

    /// Record a materialized workspace. Reuses an existing record for the story.
    pub fn track_workspace(&self, name: &str, record: WorkspaceRecord) -> BacklogResult<bool> {
        self.update(name, |backlog| backlog.track_workspace(record))
    }

    /// Forget the workspace record for a story.
    pub fn untrack_workspace(&self, name: &str, story_id: &str) -> BacklogResult<bool> {
        self.update(name, |backlog| backlog.untrack_workspace(story_id))
    }

    /// Drop workspace records that reference stories no longer in the backlog.
    pub fn drop_orphaned_workspaces(&self, name: &str) -> BacklogResult<Vec<String>> {
        self.update(name, Backlog::drop_orphaned_workspaces)
    }
}

fn validate_name(name: &str) -> BacklogResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(BacklogError::InvalidName(name.to_string()))
    }
}
