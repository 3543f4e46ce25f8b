use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// Name of the version-control metadata directory never copied into a snapshot.
const VCS_DIR: &str = ".git";

/// Which engine produces the diff between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffTool {
    /// In-process unified diff.
    #[default]
    Builtin,
    /// `git diff --no-index`.
    Git,
}

/// Result of comparing two trees. Execution failures are the `Err` side of
/// [`SnapshotStore::diff`], never an empty `Different`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    Identical,
    Different(Vec<u8>),
}

impl DiffOutcome {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            DiffOutcome::Identical
        } else {
            DiffOutcome::Different(bytes)
        }
    }
}

/// Mirrors a monitored tree to snapshot directories and diffs them.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    /// Paths relative to `root` that are skipped along with their contents.
    excluded: Vec<PathBuf>,
    tool: DiffTool,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, tool: DiffTool) -> Self {
        Self {
            root: root.into(),
            excluded: Vec::new(),
            tool,
        }
    }

    /// Skip `path` (and everything below it) when snapshotting. Relative
    /// paths are taken relative to the monitored root; absolute paths outside
    /// it are ignored.
    pub fn exclude(mut self, path: &Path) -> Self {
        let path = without_cur_dir(path);
        let rel = if path.is_absolute() {
            path.strip_prefix(without_cur_dir(&self.root))
                .ok()
                .map(Path::to_path_buf)
        } else {
            Some(path)
        };
        if let Some(rel) = rel.filter(|r| !r.as_os_str().is_empty()) {
            self.excluded.push(rel);
        }
        self
    }

    fn is_excluded(&self, rel: &Path) -> bool {
        rel.file_name().is_some_and(|n| n == VCS_DIR) || self.excluded.iter().any(|e| rel == e)
    }

    // ---------------------------------------------------------------
    // Snapshotting
    // ---------------------------------------------------------------

    /// Copy the monitored root into `dest`, replacing whatever was there.
    pub fn snapshot(&self, dest: &Path) -> Result<()> {
        if let (Ok(root), Ok(dest)) = (fs::canonicalize(&self.root), fs::canonicalize(dest)) {
            if root.starts_with(&dest) {
                bail!(
                    "refusing to snapshot {} into its own ancestor {}",
                    root.display(),
                    dest.display()
                );
            }
        }

        match fs::remove_dir_all(dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("clearing {}", dest.display())),
        }
        fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .map(|rel| !self.is_excluded(rel))
                    .unwrap_or(false)
            });

        for entry in walker {
            let entry = entry.with_context(|| format!("walking {}", self.root.display()))?;
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .context("walked outside the monitored root")?;
            let target = dest.join(rel);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir_all(&target)
                    .with_context(|| format!("creating {}", target.display()))?;
            } else if file_type.is_symlink() {
                copy_symlink(entry.path(), &target)?;
            } else {
                fs::copy(entry.path(), &target).with_context(|| {
                    format!("copying {} to {}", entry.path().display(), target.display())
                })?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Diffing
    // ---------------------------------------------------------------

    pub fn diff(&self, a: &Path, b: &Path) -> Result<DiffOutcome> {
        match self.tool {
            DiffTool::Builtin => builtin_diff(a, b),
            DiffTool::Git => git_no_index_diff(a, b),
        }
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(src).with_context(|| format!("reading link {}", src.display()))?;
    std::os::unix::fs::symlink(&link, target)
        .with_context(|| format!("creating link {}", target.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _target: &Path) -> Result<()> {
    tracing::debug!("skipping symlink {}", src.display());
    Ok(())
}

/// Regular files and symlinks under `dir`, keyed by their path relative to it.
fn list_files(dir: &Path) -> Result<BTreeMap<PathBuf, PathBuf>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .context("walked outside the snapshot")?
            .to_path_buf();
        files.insert(rel, entry.into_path());
    }
    Ok(files)
}

/// A file as git would see it: mode plus content (link target for symlinks).
#[derive(Debug, PartialEq, Eq)]
struct Entry {
    mode: u32,
    bytes: Vec<u8>,
}

const MODE_FILE: u32 = 0o100644;
const MODE_EXECUTABLE: u32 = 0o100755;
const MODE_SYMLINK: u32 = 0o120000;

fn read_entry(path: &Path) -> Result<Entry> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.file_type().is_symlink() {
        let link = fs::read_link(path).with_context(|| format!("reading link {}", path.display()))?;
        return Ok(Entry {
            mode: MODE_SYMLINK,
            bytes: link.to_string_lossy().into_owned().into_bytes(),
        });
    }
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Entry {
        mode: file_mode(&meta),
        bytes,
    })
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o111 != 0 {
        MODE_EXECUTABLE
    } else {
        MODE_FILE
    }
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    MODE_FILE
}

/// `path` with its `.` components dropped, so `./.revly` and `.revly` compare
/// equal.
fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn display_path(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

/// Git-style unified diff of two trees, files in path order.
fn builtin_diff(a: &Path, b: &Path) -> Result<DiffOutcome> {
    let old_files = list_files(a)?;
    let new_files = list_files(b)?;
    let paths: BTreeSet<&PathBuf> = old_files.keys().chain(new_files.keys()).collect();

    let mut out = String::new();
    for rel in paths {
        let old = old_files.get(rel).map(|p| read_entry(p)).transpose()?;
        let new = new_files.get(rel).map(|p| read_entry(p)).transpose()?;
        if old == new {
            continue;
        }
        write_file_diff(&mut out, &display_path(rel), old.as_ref(), new.as_ref());
    }
    Ok(DiffOutcome::from_bytes(out.into_bytes()))
}

fn write_file_diff(out: &mut String, name: &str, old: Option<&Entry>, new: Option<&Entry>) {
    out.push_str(&format!("diff --git a/{name} b/{name}\n"));
    match (old, new) {
        (None, Some(new)) => out.push_str(&format!("new file mode {:o}\n", new.mode)),
        (Some(old), None) => out.push_str(&format!("deleted file mode {:o}\n", old.mode)),
        (Some(old), Some(new)) if old.mode != new.mode => {
            out.push_str(&format!("old mode {:o}\nnew mode {:o}\n", old.mode, new.mode));
            if old.bytes == new.bytes {
                return;
            }
        }
        _ => {}
    }
    let (old, new) = (old.map(|e| e.bytes.as_slice()), new.map(|e| e.bytes.as_slice()));

    let old_header = old.map_or_else(|| "/dev/null".to_string(), |_| format!("a/{name}"));
    let new_header = new.map_or_else(|| "/dev/null".to_string(), |_| format!("b/{name}"));

    let old_text = old.map(std::str::from_utf8).transpose();
    let new_text = new.map(std::str::from_utf8).transpose();
    match (old_text, new_text) {
        (Ok(old_text), Ok(new_text)) => {
            let (old_text, new_text) = (old_text.unwrap_or(""), new_text.unwrap_or(""));
            let diff = TextDiff::from_lines(old_text, new_text);
            out.push_str(
                &diff
                    .unified_diff()
                    .context_radius(3)
                    .header(&old_header, &new_header)
                    .to_string(),
            );
        }
        _ => out.push_str(&format!("Binary files {old_header} and {new_header} differ\n")),
    }
}

/// `git diff --no-index` exits 1 when the trees differ. It also exits 1 when
/// it cannot read its arguments, but then prints nothing on stdout.
fn git_no_index_diff(a: &Path, b: &Path) -> Result<DiffOutcome> {
    let output = Command::new("git")
        .args(["diff", "--no-index", "--no-color", "--"])
        .arg(a)
        .arg(b)
        .output()
        .context("running git diff --no-index")?;

    match output.status.code() {
        Some(0) => Ok(DiffOutcome::Identical),
        Some(1) if !output.stdout.is_empty() => Ok(DiffOutcome::Different(output.stdout)),
        code => bail!(
            "git diff --no-index failed ({}): {}",
            code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit {c}")),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    }
}
