use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Which pair of git states to compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSource {
    /// Working tree against the index (`git diff`).
    Working,
    /// Index against HEAD (`git diff --cached`).
    Staged,
    /// A commit against its first parent (`git show <rev>`).
    Commit(String),
}

impl DiffSource {
    pub fn describe(&self) -> String {
        match self {
            DiffSource::Working => "working directory diff".into(),
            DiffSource::Staged => "staged diff".into(),
            DiffSource::Commit(rev) => format!("diff for commit <{rev}>"),
        }
    }
}

pub struct Repo {
    repo: git2::Repository,
    workdir: PathBuf,
}

impl Repo {
    /// Open the git repo containing `cwd`.
    pub fn discover(cwd: &Path) -> Result<Self> {
        let repo = git2::Repository::discover(cwd)
            .with_context(|| format!("finding git repo from {}", cwd.display()))?;
        let workdir = repo
            .workdir()
            .context("git repo is bare, no working directory")?
            .to_path_buf();
        Ok(Self { repo, workdir })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn head_tree(&self) -> Option<git2::Tree<'_>> {
        self.repo.head().ok().and_then(|h| h.peel_to_tree().ok())
    }

    // ---------------------------------------------------------------
    // Diffs
    // ---------------------------------------------------------------

    /// Render the requested diff in patch format. An empty result means there
    /// is nothing to compare.
    pub fn diff(&self, source: &DiffSource) -> Result<Vec<u8>> {
        let mut opts = git2::DiffOptions::new();
        match source {
            DiffSource::Working => {
                let diff = self
                    .repo
                    .diff_index_to_workdir(None, Some(&mut opts))
                    .context("diffing working tree against index")?;
                patch_bytes(&diff)
            }
            DiffSource::Staged => {
                let head = self.head_tree();
                let diff = self
                    .repo
                    .diff_tree_to_index(head.as_ref(), None, Some(&mut opts))
                    .context("diffing index against HEAD")?;
                patch_bytes(&diff)
            }
            DiffSource::Commit(rev) => {
                let commit = self
                    .repo
                    .revparse_single(rev)
                    .and_then(|obj| obj.peel_to_commit())
                    .with_context(|| format!("resolving commit {rev}"))?;
                let tree = commit.tree().context("reading commit tree")?;
                let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
                let diff = self
                    .repo
                    .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))
                    .with_context(|| format!("diffing commit {rev}"))?;
                let patch = patch_bytes(&diff)?;
                if patch.is_empty() {
                    return Ok(patch);
                }
                let mut out = commit_header(&commit).into_bytes();
                out.extend_from_slice(&patch);
                Ok(out)
            }
        }
    }

    // ---------------------------------------------------------------
    // Staging and committing
    // ---------------------------------------------------------------

    /// Stage all changes (new, modified and deleted files) except those under
    /// `skip`, which is relative to the work tree.
    pub fn stage_all(&self, skip: &Path) -> Result<()> {
        let mut index = self.repo.index().context("opening index")?;
        let mut filter = |path: &Path, _matched: &[u8]| -> i32 {
            if path.starts_with(skip) {
                1 // skip
            } else {
                0 // add
            }
        };
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, Some(&mut filter))
            .context("staging changes")?;
        index
            .update_all(["*"].iter(), Some(&mut filter))
            .context("staging deletions")?;
        index.write().context("writing index")
    }

    /// Commit the current index on HEAD and return the new commit OID.
    pub fn commit(&self, message: &str) -> Result<git2::Oid> {
        let mut index = self.repo.index().context("opening index")?;
        let tree_oid = index.write_tree().context("writing tree")?;
        let tree = self.repo.find_tree(tree_oid).context("finding tree")?;
        let sig = self
            .repo
            .signature()
            .context("reading git signature (user.name / user.email)")?;
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .context("creating commit")
    }
}

fn patch_bytes(diff: &git2::Diff) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            out.push(line.origin() as u8);
        }
        out.extend_from_slice(line.content());
        true
    })
    .context("rendering diff")?;
    Ok(out)
}

fn commit_header(commit: &git2::Commit) -> String {
    let author = commit.author();
    let mut header = format!(
        "commit {}\nAuthor: {} <{}>\n\n",
        commit.id(),
        author.name().unwrap_or(""),
        author.email().unwrap_or("")
    );
    for line in commit.message().unwrap_or("").lines() {
        header.push_str("    ");
        header.push_str(line);
        header.push('\n');
    }
    header.push('\n');
    header
}
