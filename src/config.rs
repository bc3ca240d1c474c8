//! Layered settings.
//!
//! Sources, lowest precedence first: built-in defaults,
//! `<repo>/.ralph/config.toml` (optional), `RALPH_*` environment variables.
//! Command-line flags are applied on top by the binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::agent::CommandAgent;
use crate::error::classification::DEFAULT_RECOVERABLE_PATTERNS;
use crate::error::RecoverableMatcher;
use crate::parallel::DEFAULT_PARALLELISM;
use crate::timeout::TimeoutConfig;

/// Default state directory, relative to the repository root.
pub const DEFAULT_STATE_DIR: &str = ".ralph";
const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "RALPH";
const LIST_KEYS: &[&str] = &["sync_paths", "recoverable_patterns"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    #[serde(default = "default_resolution_timeout_secs")]
    pub resolution_timeout_secs: u64,
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default)]
    pub max_batches: Option<u32>,
    #[serde(default)]
    pub trunk_branch: Option<String>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_sync_paths")]
    pub sync_paths: Vec<PathBuf>,
    /// Worker command line; the task description is appended as the last argument.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    #[serde(default = "default_recoverable_patterns")]
    pub recoverable_patterns: Vec<String>,
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_worker_timeout_secs() -> u64 {
    1800
}

fn default_resolution_timeout_secs() -> u64 {
    600
}

fn default_git_timeout_secs() -> u64 {
    120
}

fn default_batch_pause_ms() -> u64 {
    1000
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_sync_paths() -> Vec<PathBuf> {
    [".env", ".env.local", ".claude/settings.local.json", ".mcp.json"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

fn default_agent_command() -> String {
    "claude --print --dangerously-skip-permissions".to_string()
}

fn default_recoverable_patterns() -> Vec<String> {
    DEFAULT_RECOVERABLE_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            worker_timeout_secs: default_worker_timeout_secs(),
            resolution_timeout_secs: default_resolution_timeout_secs(),
            git_timeout_secs: default_git_timeout_secs(),
            batch_pause_ms: default_batch_pause_ms(),
            max_batches: None,
            trunk_branch: None,
            state_dir: default_state_dir(),
            sync_paths: default_sync_paths(),
            agent_command: default_agent_command(),
            recoverable_patterns: default_recoverable_patterns(),
        }
    }
}

impl Settings {
    /// Load settings for the repository at `repo_root`.
    pub fn load(repo_root: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(repo_root, None)
    }

    /// Like [`load`](Self::load), reading variables from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(
        repo_root: &Path,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let file = repo_root.join(DEFAULT_STATE_DIR).join(CONFIG_FILE_NAME);

        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .source(env);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        Config::builder()
            .add_source(File::from(file).format(FileFormat::Toml).required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()
    }

    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig::new()
            .with_worker_timeout(Duration::from_secs(self.worker_timeout_secs))
            .with_resolution_timeout(Duration::from_secs(self.resolution_timeout_secs))
            .with_git_timeout(Duration::from_secs(self.git_timeout_secs))
            .with_batch_pause(Duration::from_millis(self.batch_pause_ms))
    }

    pub fn recoverable_matcher(&self) -> Result<RecoverableMatcher, regex::Error> {
        RecoverableMatcher::new(&self.recoverable_patterns)
    }

    /// The configured worker, or `None` when the command is empty.
    pub fn agent(&self) -> Option<CommandAgent> {
        let words: Vec<String> = self
            .agent_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        CommandAgent::from_command_line(&words)
    }

    /// Absolute state directory for `repo_root`.
    pub fn state_root(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.state_dir)
    }
}
