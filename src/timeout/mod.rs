//! Deadline configuration for worker, conflict-resolution and git invocations.
//!
//! Every external invocation the orchestrator makes is bounded. The worker
//! and the conflict-resolution worker each get an independent deadline, and
//! every git subprocess is bounded by `git_timeout` so a hung repository
//! operation cannot stall a batch forever.

use std::time::Duration;

/// Configuration for timeout behavior during a backlog run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum time allowed for one worker invocation in the execution phase.
    /// Default: 1800 seconds (30 minutes)
    pub worker_timeout: Duration,

    /// Maximum time allowed for the conflict-resolution worker.
    /// Shorter than the worker timeout; a resolution is a narrow task.
    /// Default: 600 seconds (10 minutes)
    pub resolution_timeout: Duration,

    /// Maximum time allowed for a single git command.
    /// Default: 120 seconds
    pub git_timeout: Duration,

    /// Pause inserted between batches so repeated no-progress cycles do not
    /// spin. Default: 1 second
    pub batch_pause: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            worker_timeout: Duration::from_secs(1800),
            resolution_timeout: Duration::from_secs(600),
            git_timeout: Duration::from_secs(120),
            batch_pause: Duration::from_secs(1),
        }
    }
}

impl TimeoutConfig {
    /// Creates a new TimeoutConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker timeout duration.
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Sets the conflict-resolution timeout duration.
    pub fn with_resolution_timeout(mut self, timeout: Duration) -> Self {
        self.resolution_timeout = timeout;
        self
    }

    /// Sets the git operation timeout.
    pub fn with_git_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = timeout;
        self
    }

    /// Sets the pause between batches.
    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }
}
