use crate::config::Config;
use crate::git::{DiffSource, Repo};
use crate::reviewer::{LlmReviewer, Reviewer, Task};
use anyhow::{Context, Result};
use std::path::Path;

/// Stage, ask the model for a commit message, and commit.
pub async fn run(config: &Config, cwd: &Path, stage_all: bool, dry_run: bool) -> Result<()> {
    let repo = Repo::discover(cwd)?;

    if stage_all {
        let state_dir = config.pair.state_dir_in(repo.workdir());
        let skip = state_dir
            .strip_prefix(repo.workdir())
            .unwrap_or(&config.pair.state_dir);
        repo.stage_all(skip)?;
    }

    let diff = repo.diff(&DiffSource::Staged)?;
    if diff.is_empty() {
        println!("No staged changes to commit.");
        return Ok(());
    }

    let reviewer = LlmReviewer::from_config(config, Task::CommitMessage)?;
    let answer = reviewer
        .analyze(&diff)
        .await
        .context("generating commit message")?;
    let message = commit_message_from(&answer)
        .with_context(|| format!("model answer has no usable commit message: {answer:?}"))?;

    println!("Suggested commit message:\n  \"{message}\"\n");

    if dry_run {
        println!("Dry run mode: skipping commit.");
        return Ok(());
    }

    let oid = repo.commit(&message)?;
    println!("Committed {}", &oid.to_string()[..7]);
    Ok(())
}

/// First non-empty line of the answer with stray quoting removed.
fn commit_message_from(answer: &str) -> Option<String> {
    answer
        .lines()
        .map(|l| l.trim().trim_matches(|c| c == '"' || c == '`' || c == '\'').trim())
        .find(|l| !l.is_empty())
        .map(String::from)
}
