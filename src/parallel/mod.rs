//! Batch orchestration.
//!
//! One batch runs in three phases: workspaces are materialized one at a
//! time, workers run concurrently in all of them, and finished branches are
//! merged into the trunk strictly one after another. A batch never starts
//! before the previous batch's merges are done.

pub mod execution;
pub mod merge;
pub mod scheduler;

pub use execution::{ExecutionPhase, ExecutionResult, ExecutionStatus};
pub use merge::{MergeCoordinator, MergeOutcome};
pub use scheduler::{
    clamp_parallelism, select_batch, BatchScheduler, FailureStage, RunSummary, SchedulerConfig,
    StoryFailure, DEFAULT_PARALLELISM, MAX_PARALLELISM,
};
