//! Backlog storage.
//!
//! A backlog is a JSON document of stories plus the set of workspaces that
//! are currently materialized for it. The on-disk document is the single
//! source of truth: the scheduler re-reads it at the start of every cycle,
//! since it may be edited externally between cycles.

pub mod model;
pub mod store;

pub use model::{next_pending_story, Backlog, Story, WorkspaceRecord, WorkspaceStatus};
pub use store::{BacklogError, BacklogResult, BacklogStore};
