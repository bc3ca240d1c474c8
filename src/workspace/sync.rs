//! Best-effort propagation of shared files into a workspace.
//!
//! Nothing in here may abort workspace creation. Each helper returns a
//! [`NonFatal`] report that the caller logs and drops.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a side effect whose failure is logged but never propagated.
#[derive(Debug, Default)]
#[must_use = "non-fatal failures should be logged"]
pub struct NonFatal {
    failures: Vec<String>,
}

impl NonFatal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, what: impl AsRef<str>, err: impl std::fmt::Display) {
        self.failures.push(format!("{}: {}", what.as_ref(), err));
    }

    pub fn merge(&mut self, other: NonFatal) {
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Emit one warning per failure.
    pub fn log(self, story_id: &str) {
        for failure in &self.failures {
            tracing::warn!(story_id, failure = %failure, "workspace sync step failed; continuing");
        }
    }
}

/// Workspace-local record of which story and backlog own a workspace.
///
/// Written for tooling and debugging; the orchestrator never reads it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceManifest {
    pub backlog: String,
    pub story_id: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

pub fn write_manifest(path: &Path, manifest: &WorkspaceManifest) -> NonFatal {
    let mut report = NonFatal::new();
    let result = (|| -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(manifest).map_err(io::Error::other)?;
        fs::write(path, json)
    })();
    if let Err(err) = result {
        report.record(format!("write manifest {}", path.display()), err);
    }
    report
}

/// Copy each of `relative_paths` from `source_root` into `dest_root`.
///
/// Missing sources are skipped silently; they are optional by nature.
pub fn copy_shared_paths(source_root: &Path, dest_root: &Path, relative_paths: &[PathBuf]) -> NonFatal {
    let mut report = NonFatal::new();
    for relative in relative_paths {
        let source = source_root.join(relative);
        if !source.exists() {
            continue;
        }
        let dest = dest_root.join(relative);
        if let Err(err) = copy_path(&source, &dest) {
            report.record(format!("copy {}", relative.display()), err);
        }
    }
    report
}

/// Copy a single file to `dest`, creating parent directories.
pub fn copy_file(source: &Path, dest: &Path) -> NonFatal {
    let mut report = NonFatal::new();
    if let Err(err) = copy_path(source, dest) {
        report.record(format!("copy {}", source.display()), err);
    }
    report
}

fn copy_path(source: &Path, dest: &Path) -> io::Result<()> {
    if source.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_path(&entry.path(), &dest.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest).map(|_| ())
    }
}
