//! The pair-programming loop: snapshot the monitored tree on a timer, diff it
//! against the baseline taken at startup, and send each diff the reviewer has
//! not seen before.
//!
//! One tick walks `Snapshotting → Diffing → CheckingCache → Dispatching` and
//! always ends back in idle. Only the initial baseline snapshot can fail the
//! whole loop; everything after that is contained to the tick it happened in.

use crate::cache::ReviewCache;
use crate::config::PairConfig;
use crate::fingerprint::Fingerprint;
use crate::reviewer::{ReviewError, Reviewer};
use crate::snapshot::{DiffOutcome, SnapshotStore};
use anyhow::{ensure, Context, Result};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// A novel change and what the reviewer said about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub fingerprint: Fingerprint,
    pub feedback: String,
}

/// How a single tick ended.
#[derive(Debug)]
pub enum TickOutcome {
    /// Another tick was still running.
    Busy,
    SnapshotFailed(anyhow::Error),
    DiffFailed(anyhow::Error),
    /// The tree matches the baseline.
    NoChanges,
    /// This exact diff was reviewed on an earlier tick.
    AlreadySeen(Fingerprint),
    /// `cached` is false when the result could not be persisted.
    Reviewed { suggestion: Suggestion, cached: bool },
    /// Nothing was cached, so the same diff is retried next tick.
    ReviewFailed {
        fingerprint: Fingerprint,
        error: ReviewError,
    },
}

/// Non-blocking tick-in-progress flag, released on drop.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| TickGuard(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Run filesystem work off the async worker threads. `what` names the task
/// if it panics.
async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .with_context(|| format!("{what} task panicked"))?
}

pub struct PairLoop<R> {
    store: SnapshotStore,
    cache: ReviewCache,
    reviewer: R,
    baseline: PathBuf,
    current: PathBuf,
    ticking: AtomicBool,
}

impl<R: Reviewer> PairLoop<R> {
    /// Prepare the state directory under `root` and take the baseline
    /// snapshot. Failing here is fatal: there is nothing to diff against.
    pub async fn start(root: &Path, config: &PairConfig, reviewer: R) -> Result<Self> {
        ensure!(
            root.is_dir(),
            "cannot take baseline snapshot: {} is not a directory",
            root.display()
        );
        // The state dir is excluded by prefix, so both paths must be canonical.
        let root = fs::canonicalize(root)
            .with_context(|| format!("resolving {}", root.display()))?;
        let state_dir = config.state_dir_in(&root);
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("creating {}", state_dir.display()))?;
        let state_dir = fs::canonicalize(&state_dir)
            .with_context(|| format!("resolving {}", state_dir.display()))?;

        let store = SnapshotStore::new(&root, config.diff_tool).exclude(&state_dir);
        let snapshots = state_dir.join("snapshots");
        let baseline = snapshots.join("baseline");
        let current = snapshots.join("current");

        {
            let store = store.clone();
            let baseline = baseline.clone();
            blocking("baseline snapshot", move || store.snapshot(&baseline))
                .await
                .context("creating baseline snapshot")?;
        }
        info!("baseline snapshot of {} taken", root.display());

        Ok(Self {
            store,
            cache: ReviewCache::new(state_dir.join("cache")),
            reviewer,
            baseline,
            current,
            ticking: AtomicBool::new(false),
        })
    }

    pub fn cache(&self) -> &ReviewCache {
        &self.cache
    }

    /// Run one full pipeline pass.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = TickGuard::acquire(&self.ticking) else {
            debug!("previous tick still running, skipping");
            return TickOutcome::Busy;
        };

        let store = self.store.clone();
        let current = self.current.clone();
        if let Err(e) = blocking("snapshot", move || store.snapshot(&current)).await {
            error!("snapshot failed: {e:#}");
            return TickOutcome::SnapshotFailed(e);
        }

        let store = self.store.clone();
        let (baseline, current) = (self.baseline.clone(), self.current.clone());
        let diff = match blocking("diff", move || store.diff(&baseline, &current)).await {
            Ok(DiffOutcome::Identical) => {
                debug!("no changes since baseline");
                return TickOutcome::NoChanges;
            }
            Ok(DiffOutcome::Different(bytes)) => bytes,
            Err(e) => {
                error!("diff failed: {e:#}");
                return TickOutcome::DiffFailed(e);
            }
        };

        let fingerprint = Fingerprint::of(&diff);
        if self.cache.lookup(&fingerprint).is_some() {
            debug!("diff {} already reviewed", fingerprint.short());
            return TickOutcome::AlreadySeen(fingerprint);
        }

        info!(
            "new changes ({} bytes, {}), asking reviewer",
            diff.len(),
            fingerprint.short()
        );
        match self.reviewer.analyze(&diff).await {
            Ok(feedback) => {
                let cached = match self.cache.store(&fingerprint, feedback.as_bytes()) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("could not cache review {}: {e:#}", fingerprint.short());
                        false
                    }
                };
                TickOutcome::Reviewed {
                    suggestion: Suggestion {
                        fingerprint,
                        feedback,
                    },
                    cached,
                }
            }
            Err(error) => {
                error!("reviewer failed for {}: {error}", fingerprint.short());
                TickOutcome::ReviewFailed { fingerprint, error }
            }
        }
    }

    /// Tick every `every` until `shutdown` resolves, handing each new
    /// suggestion to `on_suggestion`. The first tick fires one interval after
    /// the call. An in-flight tick is abandoned on shutdown.
    pub async fn run<S, F>(&self, every: Duration, shutdown: S, mut on_suggestion: F)
    where
        S: Future<Output = ()>,
        F: FnMut(&Suggestion),
    {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let outcome = tokio::select! {
                        _ = &mut shutdown => break,
                        outcome = self.tick() => outcome,
                    };
                    if let TickOutcome::Reviewed { suggestion, .. } = outcome {
                        on_suggestion(&suggestion);
                    }
                }
            }
        }
        info!("pair loop stopped");
    }
}
