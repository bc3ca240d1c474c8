//! Git command adapter.
//!
//! Every invocation returns a [`GitOutput`] with captured stdout, stderr and
//! exit code; a non-zero exit is never an error at this layer. Callers decide
//! policy (retry next cycle, abort a merge) from the exit code. Failure to
//! spawn git, or a command outliving its deadline, is folded into the same
//! shape with exit code [`FAILED_TO_RUN`].

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Exit code reported when git could not be run or did not finish in time.
pub const FAILED_TO_RUN: i32 = -1;

/// Branch assumed when the current branch cannot be determined.
pub const FALLBACK_BRANCH: &str = "main";

/// Porcelain status codes that denote an unmerged path.
const UNMERGED_CODES: &[&str] = &["DD", "AU", "UD", "UA", "DU", "AA", "UU"];

/// Captured result of one git invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr if present, else stdout; trimmed. Used for user-facing failure messages.
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    fn failed_to_run(stderr: String) -> Self {
        Self {
            stdout: String::new(),
            stderr,
            exit_code: FAILED_TO_RUN,
        }
    }
}

/// Thin async wrapper around the `git` binary.
#[derive(Debug, Clone)]
pub struct Git {
    program: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout,
        }
    }

    /// Run `git <args>` in `cwd`.
    pub async fn run<I, S>(&self, args: I, cwd: &Path) -> GitOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let command_line = args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                tracing::warn!(args = %command_line, cwd = %cwd.display(), error = %err, "failed to run git");
                return GitOutput::failed_to_run(format!("failed to run git {}: {}", command_line, err));
            }
            Err(_) => {
                tracing::warn!(args = %command_line, timeout = ?self.timeout, "git command timed out");
                return GitOutput::failed_to_run(format!(
                    "git {} timed out after {:?}",
                    command_line, self.timeout
                ));
            }
        };

        let result = GitOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(FAILED_TO_RUN),
        };
        tracing::debug!(args = %command_line, exit_code = result.exit_code, "git");
        result
    }

    /// Name of the checked-out branch, or [`FALLBACK_BRANCH`] if it cannot be determined.
    pub async fn current_branch(&self, cwd: &Path) -> String {
        let output = self.run(["rev-parse", "--abbrev-ref", "HEAD"], cwd).await;
        let name = output.stdout.trim();
        if output.success() && !name.is_empty() && name != "HEAD" {
            name.to_string()
        } else {
            FALLBACK_BRANCH.to_string()
        }
    }

    pub async fn branch_exists(&self, repo: &Path, name: &str) -> bool {
        let reference = format!("refs/heads/{}", name);
        self.run(["show-ref", "--verify", "--quiet", reference.as_str()], repo)
            .await
            .success()
    }

    /// Whether `base..branch` contains a commit whose message mentions `story_id`.
    ///
    /// A missing commit means "not done yet", not failure. An unknown branch
    /// or base reads as no commit.
    pub async fn has_completion_commit(
        &self,
        repo: &Path,
        branch: &str,
        story_id: &str,
        base: &str,
    ) -> bool {
        let range = format!("{}..{}", base, branch);
        let grep = format!("--grep={}", story_id);
        let output = self
            .run(
                [
                    "log",
                    "--format=%H",
                    "--fixed-strings",
                    "--regexp-ignore-case",
                    grep.as_str(),
                    range.as_str(),
                ],
                repo,
            )
            .await;
        if !output.success() {
            tracing::debug!(branch, base, error = %output.message(), "completion check failed");
            return false;
        }
        !output.stdout.trim().is_empty()
    }

    /// Whether `path` is the root of a usable git working tree.
    pub async fn is_worktree(&self, path: &Path) -> bool {
        if !path.join(".git").exists() {
            return false;
        }
        let output = self.run(["rev-parse", "--is-inside-work-tree"], path).await;
        output.success() && output.stdout.trim().eq_ignore_ascii_case("true")
    }

    /// Attach a new worktree at `path` to the existing `branch`.
    pub async fn worktree_add_existing(&self, repo: &Path, path: &Path, branch: &str) -> GitOutput {
        self.run(
            [
                OsStr::new("worktree"),
                OsStr::new("add"),
                path.as_os_str(),
                OsStr::new(branch),
            ],
            repo,
        )
        .await
    }

    /// Create `branch` from `start_point` and a worktree for it at `path`.
    pub async fn worktree_add_new(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        start_point: &str,
    ) -> GitOutput {
        self.run(
            [
                OsStr::new("worktree"),
                OsStr::new("add"),
                OsStr::new("-b"),
                OsStr::new(branch),
                path.as_os_str(),
                OsStr::new(start_point),
            ],
            repo,
        )
        .await
    }

    pub async fn worktree_remove(&self, repo: &Path, path: &Path) -> GitOutput {
        self.run(
            [
                OsStr::new("worktree"),
                OsStr::new("remove"),
                OsStr::new("--force"),
                path.as_os_str(),
            ],
            repo,
        )
        .await
    }

    pub async fn worktree_prune(&self, repo: &Path) -> GitOutput {
        self.run(["worktree", "prune"], repo).await
    }

    pub async fn checkout(&self, repo: &Path, branch: &str) -> GitOutput {
        self.run(["checkout", branch], repo).await
    }

    pub async fn merge(&self, repo: &Path, branch: &str) -> GitOutput {
        self.run(["merge", "--no-edit", branch], repo).await
    }

    pub async fn merge_abort(&self, repo: &Path) -> GitOutput {
        self.run(["merge", "--abort"], repo).await
    }

    /// Whether a merge is in progress (MERGE_HEAD exists).
    pub async fn merge_in_progress(&self, repo: &Path) -> bool {
        self.run(["rev-parse", "-q", "--verify", "MERGE_HEAD"], repo)
            .await
            .success()
    }

    /// Conclude an in-progress merge with the prepared message.
    pub async fn commit_no_edit(&self, repo: &Path) -> GitOutput {
        self.run(["commit", "--no-edit"], repo).await
    }

    /// Paths left unmerged in the working tree.
    pub async fn unmerged_paths(&self, repo: &Path) -> Result<Vec<String>, String> {
        let output = self.run(["status", "--porcelain"], repo).await;
        if !output.success() {
            return Err(output.message());
        }
        Ok(parse_unmerged(&output.stdout))
    }

    /// Whether `commit` is reachable from `target`. Any failure reads as false.
    pub async fn is_ancestor(&self, repo: &Path, commit: &str, target: &str) -> bool {
        self.run(["merge-base", "--is-ancestor", commit, target], repo)
            .await
            .success()
    }

    pub async fn delete_branch(&self, repo: &Path, branch: &str) -> GitOutput {
        self.run(["branch", "-D", branch], repo).await
    }

    /// The repository's shared git directory (same for all worktrees).
    pub async fn common_dir(&self, repo: &Path) -> Option<PathBuf> {
        let output = self.run(["rev-parse", "--git-common-dir"], repo).await;
        if !output.success() {
            return None;
        }
        let dir = PathBuf::from(output.stdout.trim());
        Some(if dir.is_absolute() { dir } else { repo.join(dir) })
    }
}

/// Whether a failed merge stopped on content conflicts.
pub fn is_conflict(output: &GitOutput) -> bool {
    if output.success() {
        return false;
    }
    let markers = ["CONFLICT", "Automatic merge failed"];
    markers
        .iter()
        .any(|m| output.stdout.contains(m) || output.stderr.contains(m))
}

/// Extract unmerged paths from `git status --porcelain` output.
pub fn parse_unmerged(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter(|line| line.len() > 3)
        .filter(|line| UNMERGED_CODES.contains(&&line[..2]))
        .map(|line| line[3..].to_string())
        .collect()
}
