use crate::fingerprint::Fingerprint;
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Content-addressed store of reviewer output, one file per fingerprint.
///
/// Entries are never updated or evicted, so the directory grows for the
/// lifetime of the monitored project.
#[derive(Debug, Clone)]
pub struct ReviewCache {
    root: PathBuf,
}

impl ReviewCache {
    /// The root directory is not touched until the first `store`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Read the entry for `key`. A missing entry is the normal "novel change"
    /// signal, and any other read failure is treated the same way so the
    /// caller can go on to dispatch.
    pub fn lookup(&self, key: &Fingerprint) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("reading cache entry {}: {e}", path.display());
                None
            }
        }
    }

    /// Persist `result` under `key`. The bytes go to a temporary sibling first
    /// and are renamed into place, so `lookup` never sees a partial entry.
    pub fn store(&self, key: &Fingerprint, result: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating cache dir {}", self.root.display()))?;

        let path = self.entry_path(key);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", key.as_str(), std::process::id()));

        let written = fs::File::create(&tmp)
            .and_then(|mut f| {
                f.write_all(result)?;
                f.sync_all()
            })
            .with_context(|| format!("writing {}", tmp.display()));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        match fs::rename(&tmp, &path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e).with_context(|| format!("moving cache entry into {}", path.display()))
            }
        }
    }
}
