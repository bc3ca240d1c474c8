use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{AgentOutcome, AgentRunner};

/// Lines of worker output kept in an error message.
const ERROR_TAIL_LINES: usize = 20;

/// Worker backed by a command-line agent.
///
/// The task description is passed as the final argument. Exit status 0 is
/// success; anything else is an error carrying the tail of the output. The
/// child process is killed if the run is abandoned. On Unix it runs in its
/// own process group, so terminal signals reach only the orchestrator.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
}

impl CommandAgent {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a full command line split into words (`["claude", "--print"]`).
    pub fn from_command_line(words: &[String]) -> Option<Self> {
        let (program, args) = words.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl AgentRunner for CommandAgent {
    async fn run(&self, working_dir: &Path, task: &str) -> AgentOutcome {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(task)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a Ctrl-C aimed at the orchestrator must not
        // interrupt workers of the batch it is letting finish.
        #[cfg(unix)]
        command.process_group(0);

        let output = match command.output().await {
            Ok(output) => output,
            Err(err) => {
                return AgentOutcome::error(format!("failed to start {}: {}", self.program, err))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty());
            return AgentOutcome::Success {
                message: last_line.map(|l| l.trim().to_string()),
            };
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let source = if stderr.trim().is_empty() { stdout } else { stderr };
        let tail = tail_lines(&source, ERROR_TAIL_LINES);
        let message = if tail.is_empty() {
            format!("{} exited with {}", self.program, output.status)
        } else {
            tail
        };
        AgentOutcome::Error { message }
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
