use crate::cache::ReviewCache;
use crate::config::Config;
use crate::fingerprint::Fingerprint;
use crate::git::{DiffSource, Repo};
use crate::reviewer::{LlmReviewer, Reviewer, Task};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// One-shot review of a git diff, deduplicated through the same cache the
/// pair loop uses.
pub async fn run(config: &Config, cwd: &Path, source: DiffSource, show_diff: bool) -> Result<()> {
    let repo = Repo::discover(cwd)?;
    info!("Fetching {}...", source.describe());
    let diff = repo.diff(&source)?;

    if String::from_utf8_lossy(&diff).trim().is_empty() {
        println!("No changes to review.");
        return Ok(());
    }

    if show_diff || config.git.show_diff {
        println!("=== BEGIN DIFF ===");
        print!("{}", String::from_utf8_lossy(&diff));
        println!("=== END DIFF ===");
    }

    let cache = ReviewCache::new(config.pair.state_dir_in(repo.workdir()).join("cache"));
    let reviewer = LlmReviewer::from_config(config, Task::Review)?;
    let review = cached_review(&cache, &diff, &reviewer).await?;

    println!("\n=== AI Review ===");
    println!("{review}");
    println!("=== END OF REVIEW ===");
    Ok(())
}

/// Return the cached review for `diff`, or ask `reviewer` and cache the answer.
/// A failed cache write only costs the dedupe, so it is logged, not returned.
pub async fn cached_review<R: Reviewer + ?Sized>(
    cache: &ReviewCache,
    diff: &[u8],
    reviewer: &R,
) -> Result<String> {
    let key = Fingerprint::of(diff);
    if let Some(bytes) = cache.lookup(&key) {
        info!("Using cached review {}", key.short());
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }

    info!("Sending {} bytes to AI...", diff.len());
    let review = reviewer.analyze(diff).await.context("reviewing diff")?;
    if let Err(e) = cache.store(&key, review.as_bytes()) {
        warn!("could not cache review: {e:#}");
    }
    Ok(review)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reviewer::ReviewError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Reviewer for Counting {
        async fn analyze(&self, diff: &[u8]) -> Result<String, ReviewError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ReviewError::MissingApiKey("LLM_API_KEY".into()))
            } else {
                Ok(format!("{} bytes reviewed", diff.len()))
            }
        }
    }

    #[tokio::test]
    async fn second_review_of_same_diff_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReviewCache::new(dir.path());
        let reviewer = Counting::default();

        let first = cached_review(&cache, b"+line\n", &reviewer).await.unwrap();
        let second = cached_review(&cache, b"+line\n", &reviewer).await.unwrap();
        assert_eq!(first, "6 bytes reviewed");
        assert_eq!(first, second);
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReviewCache::new(dir.path().join("cache"));
        let reviewer = Counting {
            fail: true,
            ..Counting::default()
        };

        let err = cached_review(&cache, b"+line\n", &reviewer).await.unwrap_err();
        assert!(format!("{err:#}").contains("LLM_API_KEY"), "{err:#}");
        assert!(!dir.path().join("cache").exists());
    }
}
