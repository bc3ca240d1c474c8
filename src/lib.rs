//! Autonomous backlog runner.
//!
//! Stories from a backlog are executed by an external worker in isolated
//! git worktrees, several at a time, and finished work is merged back into
//! the trunk one branch at a time.

pub mod agent;
pub mod backlog;
pub mod config;
pub mod error;
pub mod evidence;
pub mod git;
pub mod parallel;
pub mod progress;
pub mod timeout;
pub mod workspace;

pub use agent::{AgentOutcome, AgentRunner, CommandAgent};
pub use backlog::{Backlog, BacklogStore, Story};
pub use config::Settings;
pub use error::{ErrorCategory, RecoverableMatcher, RunError};
pub use git::Git;
pub use parallel::{BatchScheduler, RunSummary, SchedulerConfig};
pub use progress::{ProgressEvent, ProgressSink};
pub use timeout::TimeoutConfig;
pub use workspace::WorkspaceManager;
