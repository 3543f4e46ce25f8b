mod cache;
mod commit;
mod config;
mod fingerprint;
mod git;
mod init;
mod logging;
mod pair;
mod review;
mod reviewer;
mod snapshot;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use git::DiffSource;
use pair::PairLoop;
use reviewer::{LlmReviewer, Task};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "revly",
    version,
    about = "AI-powered code review for your git changes",
    long_about = "Revly sends git diffs to an LLM and prints actionable feedback. \
                  Review staged or unstaged changes, single commits, or keep it \
                  running in pair mode for live comments as you code."
)]
struct Cli {
    /// Path to a config file (default: ./revly.config.toml, then ~/.revly/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the working tree and comment on new changes as they appear
    Pair {
        /// Seconds between change checks
        #[arg(short, long)]
        interval: Option<u64>,

        /// Directory to monitor (default: current directory)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },

    /// Review a git diff (default: unstaged changes in the working directory)
    Review {
        /// Review only staged changes
        #[arg(short, long, conflicts_with_all = ["commit", "head"])]
        staged: bool,

        /// Review a specific commit (HEAD if no value given)
        #[arg(short, long, value_name = "REV", num_args = 0..=1, default_missing_value = "HEAD")]
        commit: Option<String>,

        /// Review the latest commit (HEAD)
        #[arg(long, conflicts_with = "commit")]
        head: bool,

        /// Print the diff before the review
        #[arg(long)]
        diff: bool,
    },

    /// Stage changes and commit them with a generated message
    Commit {
        /// Commit only what is already staged
        #[arg(long)]
        no_all: bool,

        /// Only print the suggested message
        #[arg(long)]
        dry_run: bool,
    },

    /// Create a default revly.config.toml in the current directory
    Init,
}

fn review_source(staged: bool, commit: Option<String>, head: bool) -> DiffSource {
    match (head, commit) {
        (true, _) => DiffSource::Commit("HEAD".into()),
        (false, Some(rev)) => DiffSource::Commit(rev),
        (false, None) if staged => DiffSource::Staged,
        (false, None) => DiffSource::Working,
    }
}

/// Pull variables from `./.env` into the environment. Variables that are
/// already set win, and a missing file is fine.
fn load_dotenv(cwd: &Path) -> Result<()> {
    let path = cwd.join(".env");
    match dotenvy::from_path(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).with_context(|| format!("loading {}", path.display())),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl+C ({e}); stop revly by killing the process");
        std::future::pending::<()>().await;
    }
    info!("interrupt received, shutting down");
}

async fn run_pair(config: &Config, root: &Path, interval: Duration) -> Result<()> {
    info!(
        "Starting pair programming mode with {} second interval...",
        interval.as_secs()
    );
    let reviewer = LlmReviewer::from_config(config, Task::Pair)?;
    let pair = PairLoop::start(root, &config.pair, reviewer).await?;
    info!(
        "Watching {} (reviews cached in {}). Press Ctrl+C to stop.",
        root.display(),
        pair.cache().root().display()
    );

    pair.run(interval, shutdown_signal(), |suggestion| {
        println!("Suggestion [{}]:\n{}\n", suggestion.fingerprint.short(), suggestion.feedback);
    })
    .await;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("reading current directory")?;

    let Some(command) = cli.command else {
        println!("Revly CLI - AI Code Review Assistant\n");
        println!("Try `revly review` to get started.");
        println!("For more help, use `revly --help`.");
        return Ok(());
    };

    load_dotenv(&cwd)?;
    let load_config = || Config::load(cli.config.as_deref(), &cwd);

    match command {
        Command::Pair { interval, root } => {
            let config = load_config()?;
            let root = root.map_or_else(|| cwd.clone(), |r| cwd.join(r));
            let state_dir = config.pair.state_dir_in(&root);
            // Don't let the log file conjure up a missing root.
            let log_file = root.is_dir().then_some((state_dir.as_path(), "pair.log"));
            let _guard = logging::init(log_file);
            let secs = interval.unwrap_or(config.pair.interval_secs).max(1);
            runtime()?.block_on(run_pair(&config, &root, Duration::from_secs(secs)))
        }
        Command::Review {
            staged,
            commit,
            head,
            diff,
        } => {
            let config = load_config()?;
            let _guard = logging::init(None);
            let source = review_source(staged, commit, head);
            runtime()?.block_on(review::run(&config, &cwd, source, diff))
        }
        Command::Commit { no_all, dry_run } => {
            let config = load_config()?;
            let _guard = logging::init(None);
            runtime()?.block_on(commit::run(&config, &cwd, !no_all, dry_run))
        }
        Command::Init => {
            let _guard = logging::init(None);
            init::run(&cwd)?;
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("revly: {err:#}");
        process::exit(2);
    }
}
