//! Run-level errors and worker error classification.

pub mod classification;

use thiserror::Error;

use crate::backlog::BacklogError;
use crate::parallel::RunSummary;

pub use classification::{ErrorCategory, RecoverableMatcher};

/// Errors that stop a whole backlog run.
///
/// Per-story failures never surface here; they are recorded in the run
/// summary and the story stays pending.
#[derive(Error, Debug)]
pub enum RunError {
    /// The backlog file does not exist or could not be parsed.
    #[error("backlog '{0}' not found")]
    BacklogNotFound(String),

    /// Not a single workspace of a batch could be materialized. `summary`
    /// holds what the run achieved before it stopped.
    #[error("no workspace could be materialized in batch {}: {}", .batch, format_failures(.failures))]
    NoProgress {
        batch: u32,
        failures: Vec<(String, String)>,
        summary: Box<RunSummary>,
    },

    /// Persisting the backlog failed.
    #[error(transparent)]
    Backlog(#[from] BacklogError),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(story_id, error)| format!("{}: {}", story_id, error))
        .collect::<Vec<_>>()
        .join("; ")
}
