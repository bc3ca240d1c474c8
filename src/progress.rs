//! Progress reporting.
//!
//! Every significant orchestration step emits a [`ProgressEvent`] to a
//! [`ProgressSink`]. Progress is advisory: sinks must not fail the run.

use std::io::Write;
use std::sync::Arc;

use owo_colors::OwoColorize;
use serde::Serialize;

/// A significant step of a backlog run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        backlog: String,
        parallelism: usize,
        trunk: String,
    },
    BatchStarted {
        batch: u32,
        story_ids: Vec<String>,
    },
    WorkspaceReady {
        story_id: String,
        branch: String,
        reused: bool,
    },
    WorkspaceFailed {
        story_id: String,
        error: String,
    },
    StoryExecuted {
        story_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    CompletionPending {
        story_id: String,
    },
    ConflictDetected {
        story_id: String,
        branch: String,
    },
    Merged {
        story_id: String,
        resolved_by_agent: bool,
    },
    MergeFailed {
        story_id: String,
        reason: String,
    },
    RunFinished {
        completed: usize,
        total: usize,
        remaining: Vec<String>,
    },
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: &ProgressEvent) {}
}

/// Emits events as `tracing` records under the `progress` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: &ProgressEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(target: "progress", "{}", json),
            Err(err) => tracing::debug!(error = %err, "unserializable progress event"),
        }
    }
}

/// Human-readable progress lines on stdout.
#[derive(Debug, Clone)]
pub struct ConsoleProgress {
    use_colors: bool,
}

impl ConsoleProgress {
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    fn format(&self, event: &ProgressEvent) -> String {
        let ok = |s: &str| -> String {
            if self.use_colors {
                s.green().to_string()
            } else {
                s.to_string()
            }
        };
        let warn = |s: &str| -> String {
            if self.use_colors {
                s.yellow().to_string()
            } else {
                s.to_string()
            }
        };
        let bad = |s: &str| -> String {
            if self.use_colors {
                s.red().to_string()
            } else {
                s.to_string()
            }
        };
        let bold = |s: &str| -> String {
            if self.use_colors {
                s.bold().to_string()
            } else {
                s.to_string()
            }
        };

        match event {
            ProgressEvent::RunStarted {
                backlog,
                parallelism,
                trunk,
            } => format!(
                "{} backlog {} (parallelism {}, trunk {})",
                bold("▶"),
                bold(backlog),
                parallelism,
                trunk
            ),
            ProgressEvent::BatchStarted { batch, story_ids } => {
                format!("{} {}", bold(&format!("Batch {}:", batch)), story_ids.join(", "))
            }
            ProgressEvent::WorkspaceReady {
                story_id,
                branch,
                reused,
            } => format!(
                "  {} workspace {} on {}",
                story_id,
                if *reused { "reused" } else { "created" },
                branch
            ),
            ProgressEvent::WorkspaceFailed { story_id, error } => {
                format!("  {} {}", story_id, bad(&format!("workspace failed: {}", error)))
            }
            ProgressEvent::StoryExecuted {
                story_id,
                status,
                message,
            } => {
                let status = match status.as_str() {
                    "success" => ok(status),
                    "recoverable" => warn(status),
                    _ => bad(status),
                };
                match message {
                    Some(message) => format!("  {} worker {}: {}", story_id, status, message),
                    None => format!("  {} worker {}", story_id, status),
                }
            }
            ProgressEvent::CompletionPending { story_id } => {
                format!("  {} {}", story_id, warn("no completion commit yet"))
            }
            ProgressEvent::ConflictDetected { story_id, branch } => format!(
                "  {} {}",
                story_id,
                warn(&format!("merge conflict on {}, resolving", branch))
            ),
            ProgressEvent::Merged {
                story_id,
                resolved_by_agent,
            } => {
                let how = if *resolved_by_agent {
                    "merged (conflicts resolved)"
                } else {
                    "merged"
                };
                format!("  {} {}", story_id, ok(how))
            }
            ProgressEvent::MergeFailed { story_id, reason } => {
                format!("  {} {}", story_id, bad(&format!("merge failed: {}", reason)))
            }
            ProgressEvent::RunFinished {
                completed,
                total,
                remaining,
            } => {
                let mut line = format!("{} {}/{} stories complete", bold("■"), completed, total);
                if !remaining.is_empty() {
                    line.push_str(&format!("; remaining: {}", remaining.join(", ")));
                }
                line
            }
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: &ProgressEvent) {
        let line = self.format(event);
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
    }
}

/// Broadcasts every event to several sinks.
#[derive(Clone, Default)]
pub struct ProgressFanout {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl ProgressFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressSink for ProgressFanout {
    fn emit(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
