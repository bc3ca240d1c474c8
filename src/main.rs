use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ralphswarm::backlog::{next_pending_story, BacklogError, BacklogStore};
use ralphswarm::evidence::{generate_run_id, EvidenceWriter};
use ralphswarm::git::Git;
use ralphswarm::parallel::{BatchScheduler, RunSummary, SchedulerConfig};
use ralphswarm::progress::{ConsoleProgress, ProgressFanout, TracingProgress};
use ralphswarm::{RunError, Settings, WorkspaceManager};

const EXIT_INCOMPLETE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "ralphswarm", version, about = "Run a story backlog with parallel workers in git worktrees")]
struct Cli {
    /// Repository root
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored progress output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backlog until every story passes or no progress is possible
    Run {
        backlog: String,
        /// Stories per batch (capped at 5)
        #[arg(long = "parallel")]
        parallel: Option<usize>,
        /// Stop after this many batches
        #[arg(long)]
        max_batches: Option<u32>,
        /// Trunk branch to merge into (default: current branch)
        #[arg(long)]
        trunk: Option<String>,
    },
    /// Show completion counts, pending stories and tracked workspaces
    Status { backlog: String },
    /// Print the next pending story
    Next { backlog: String },
    /// Remove a story's workspace (its branch is kept)
    Teardown { backlog: String, story_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "ralphswarm=debug" } else { "ralphswarm=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    let repo = match cli.repo.canonicalize() {
        Ok(repo) => repo,
        Err(err) => {
            eprintln!("error: repository {}: {}", cli.repo.display(), err);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let settings = match Settings::load(&repo) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: invalid configuration: {}", err);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let use_colors = !cli.no_color && std::io::stdout().is_terminal();

    match cli.command {
        Commands::Run {
            backlog,
            parallel,
            max_batches,
            trunk,
        } => {
            let mut settings = settings;
            if let Some(parallel) = parallel {
                settings.parallelism = parallel;
            }
            if max_batches.is_some() {
                settings.max_batches = max_batches;
            }
            if trunk.is_some() {
                settings.trunk_branch = trunk;
            }
            cmd_run(&repo, &settings, &backlog, use_colors).await
        }
        Commands::Status { backlog } => cmd_status(&repo, &settings, &backlog),
        Commands::Next { backlog } => cmd_next(&repo, &settings, &backlog),
        Commands::Teardown { backlog, story_id } => {
            cmd_teardown(&repo, &settings, &backlog, &story_id).await
        }
    }
}

async fn cmd_run(repo: &Path, settings: &Settings, backlog: &str, use_colors: bool) -> ExitCode {
    let matcher = match settings.recoverable_matcher() {
        Ok(matcher) => matcher,
        Err(err) => {
            eprintln!("error: invalid recoverable_patterns: {}", err);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let Some(agent) = settings.agent() else {
        eprintln!("error: agent_command is empty");
        return ExitCode::from(EXIT_USAGE);
    };

    let timeouts = settings.timeouts();
    let git = Git::new(timeouts.git_timeout);
    let store = BacklogStore::for_repo(repo, &settings.state_dir);
    let workspaces = WorkspaceManager::new(
        repo,
        &settings.state_dir,
        git.clone(),
        store.clone(),
        settings.sync_paths.clone(),
    );

    let mut progress = ProgressFanout::new()
        .with(Arc::new(ConsoleProgress::new(use_colors)))
        .with(Arc::new(TracingProgress));
    match EvidenceWriter::try_new(&settings.state_root(repo), generate_run_id(), backlog) {
        Ok(writer) => {
            tracing::debug!(run_id = writer.run_id(), "recording run evidence");
            progress = progress.with(Arc::new(writer));
        }
        Err(err) => tracing::warn!(error = %err, "run evidence disabled"),
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        if handler_stop.swap(true, Ordering::SeqCst) {
            eprintln!("second interrupt; exiting without waiting for workers");
            std::process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("stop requested; finishing the current batch (Ctrl-C again to exit now)");
    }) {
        tracing::warn!(error = %err, "could not install Ctrl-C handler");
    }

    let config = SchedulerConfig {
        backlog_name: backlog.to_string(),
        parallelism: settings.parallelism,
        max_batches: settings.max_batches,
        trunk: settings.trunk_branch.clone(),
        timeouts,
    };
    let scheduler = BatchScheduler::new(config, store, workspaces, git, Arc::new(agent))
        .with_matcher(matcher)
        .with_progress(Arc::new(progress))
        .with_stop_flag(stop);

    match scheduler.run().await {
        Ok(summary) => {
            print_summary(&summary, use_colors);
            if summary.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INCOMPLETE)
            }
        }
        Err(err) => {
            eprintln!("error: {}", err);
            if let RunError::NoProgress { summary, .. } = &err {
                print_summary(summary, use_colors);
            }
            ExitCode::from(EXIT_INCOMPLETE)
        }
    }
}

fn print_summary(summary: &RunSummary, use_colors: bool) {
    let headline = format!(
        "{}/{} stories complete after {} batch(es)",
        summary.completed, summary.total, summary.batches
    );
    if use_colors && summary.all_passed() {
        println!("{}", headline.green().bold());
    } else {
        println!("{}", headline);
    }
    if summary.stopped {
        println!("Run stopped on request.");
    }
    if !summary.failures.is_empty() {
        println!("Failures:");
        for failure in &summary.failures {
            println!(
                "  batch {} {} ({:?}): {}",
                failure.batch, failure.story_id, failure.stage, failure.message
            );
        }
    }
    if !summary.remaining.is_empty() {
        println!("Remaining: {}", summary.remaining.join(", "));
    }
}

fn cmd_status(repo: &Path, settings: &Settings, name: &str) -> ExitCode {
    let store = BacklogStore::for_repo(repo, &settings.state_dir);
    let backlog = match store.load(name) {
        Ok(backlog) => backlog,
        Err(err) => return report_backlog_error(err),
    };

    let title = if backlog.project.is_empty() { name } else { backlog.project.as_str() };
    println!(
        "{}: {}/{} stories complete",
        title,
        backlog.completed_count(),
        backlog.stories.len()
    );

    let pending = backlog.pending_stories();
    if !pending.is_empty() {
        println!("Pending:");
        for story in pending {
            println!("  {} (priority {}) {}", story.id, story.priority, story.title);
        }
    }
    if !backlog.tracked_workspaces.is_empty() {
        println!("Workspaces:");
        for record in &backlog.tracked_workspaces {
            println!(
                "  {} {} {:?} {}",
                record.story_id,
                record.branch_name,
                record.status,
                record.workspace_path.display()
            );
        }
    }
    ExitCode::SUCCESS
}

fn cmd_next(repo: &Path, settings: &Settings, name: &str) -> ExitCode {
    let store = BacklogStore::for_repo(repo, &settings.state_dir);
    let backlog = match store.load(name) {
        Ok(backlog) => backlog,
        Err(err) => return report_backlog_error(err),
    };
    match next_pending_story(&backlog) {
        Some(story) => println!("{} (priority {}) {}", story.id, story.priority, story.title),
        None => println!("All stories complete"),
    }
    ExitCode::SUCCESS
}

async fn cmd_teardown(repo: &Path, settings: &Settings, name: &str, story_id: &str) -> ExitCode {
    let git = Git::new(settings.timeouts().git_timeout);
    let store = BacklogStore::for_repo(repo, &settings.state_dir);
    let workspaces = WorkspaceManager::new(
        repo,
        &settings.state_dir,
        git,
        store,
        settings.sync_paths.clone(),
    );
    match workspaces.teardown(name, story_id).await {
        Ok(()) => {
            println!("Removed workspace for {}", story_id);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(EXIT_INCOMPLETE)
        }
    }
}

fn report_backlog_error(err: BacklogError) -> ExitCode {
    eprintln!("error: {}", err);
    ExitCode::from(EXIT_INCOMPLETE)
}
