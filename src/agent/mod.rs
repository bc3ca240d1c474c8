//! The worker contract.
//!
//! A worker is opaque: it receives a working directory and a task
//! description and eventually reports success or an error message. The
//! orchestrator never trusts the report for completion; completion is
//! inferred from commit history and, for conflict resolution, from
//! repository status.

pub mod command;
pub mod prompt;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use command::CommandAgent;

/// What a worker reported when it returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcomeType", rename_all = "lowercase")]
pub enum AgentOutcome {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

impl AgentOutcome {
    pub fn success() -> Self {
        AgentOutcome::Success { message: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        AgentOutcome::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AgentOutcome::Success { .. })
    }
}

/// Failures of the invocation itself, as opposed to a reported error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("worker timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker task panicked: {0}")]
    Crashed(String),
}

/// An external worker that performs a task in a working directory.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run the task to completion.
    ///
    /// Implementations must release their resources when the returned future
    /// is dropped; a deadline expiry drops it.
    async fn run(&self, working_dir: &Path, task: &str) -> AgentOutcome;
}

/// Run `agent` with a deadline.
///
/// On expiry the invocation is abandoned (its future dropped) and
/// [`AgentError::Timeout`] is returned.
pub async fn run_with_deadline(
    agent: &dyn AgentRunner,
    working_dir: &Path,
    task: &str,
    timeout: Duration,
) -> Result<AgentOutcome, AgentError> {
    tokio::time::timeout(timeout, agent.run(working_dir, task))
        .await
        .map_err(|_| AgentError::Timeout(timeout))
}
