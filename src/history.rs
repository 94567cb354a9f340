//! History queries: the contract the resolver is built on, plus the
//! git2-backed implementation.
//!
//! Two query shapes cover everything the resolver needs: a windowed backward
//! scan over the commits below a revision, and a targeted "latest commit
//! touching exactly this path" lookup. Both read immutable history only, so
//! any number of them can run in parallel.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use git2::{DiffOptions, Oid, Repository, Sort};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier for one point in history (a commit), as a hex object id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Oid> for CommitId {
    fn from(oid: Oid) -> Self {
        Self(oid.to_string())
    }
}

/// One batch scan item: a commit and the paths it touched under the scanned
/// directory, relative to that directory. `touched` is empty for commits that
/// changed nothing under it.
#[derive(Debug, Clone)]
pub struct CommitTouches {
    pub commit: CommitId,
    pub touched: Vec<PathBuf>,
}

/// Read-only history queries.
///
/// Implementations answer against immutable history: the same arguments must
/// always produce the same commits in the same order, or resolution results
/// would depend on scheduling.
pub trait HistoryQuery: Send + Sync {
    /// Walk history backward from `revision` (inclusive), skip the first
    /// `skip` commits, and return the next `window` of them newest-first,
    /// each with its touched paths under `dir`. A short or empty window means
    /// history is exhausted, a valid end rather than an error.
    ///
    /// Skip-based paging lets a caller hold several windows in flight at
    /// once: consecutive `(skip, window)` pages tile one well-defined commit
    /// sequence.
    fn scan_history(
        &self,
        revision: &CommitId,
        dir: &Path,
        skip: usize,
        window: usize,
    ) -> Result<Vec<CommitTouches>>;

    /// The nearest ancestor of `revision` (inclusive) that touched exactly
    /// `path`, or `None` if no commit at or below `revision` ever touched it.
    fn latest_commit_for_path(&self, revision: &CommitId, path: &Path) -> Result<Option<CommitId>>;
}

/// Lazily fetched commit metadata, not needed for resolution itself.
#[derive(Debug, Clone)]
pub struct CommitSummary {
    pub id: CommitId,
    pub author: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// git2-backed [`HistoryQuery`].
///
/// The repository is opened per call rather than held open: queries run on
/// blocking worker threads and `git2::Repository` is not `Sync`.
pub struct GitHistory {
    repo_path: PathBuf,
}

impl GitHistory {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.repo_path).context("Failed to open repository")
    }

    /// Fetch author, message, and time for a resolved commit.
    pub fn commit_summary(&self, id: &CommitId) -> Result<CommitSummary> {
        let repo = self.open()?;
        let oid = Oid::from_str(id.as_str()).context("Invalid commit id")?;
        let commit = repo.find_commit(oid).context("No such commit")?;

        let time = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);
        let author = commit.author().name().unwrap_or("unknown").to_string();
        let message = commit.summary().unwrap_or("").to_string();

        Ok(CommitSummary {
            id: id.clone(),
            author,
            message,
            time,
        })
    }
}

impl HistoryQuery for GitHistory {
    fn scan_history(
        &self,
        revision: &CommitId,
        dir: &Path,
        skip: usize,
        window: usize,
    ) -> Result<Vec<CommitTouches>> {
        let repo = self.open()?;
        let oid = Oid::from_str(revision.as_str()).context("Invalid revision")?;

        let mut revwalk = repo.revwalk()?;
        // A fixed sort keeps skip/window pages tiling one stable sequence.
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push(oid)?;

        let mut out = Vec::new();
        for oid in revwalk.skip(skip).take(window) {
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            let touched = touched_under(&repo, &commit, dir)?;
            out.push(CommitTouches {
                commit: oid.into(),
                touched,
            });
        }
        Ok(out)
    }

    fn latest_commit_for_path(&self, revision: &CommitId, path: &Path) -> Result<Option<CommitId>> {
        let repo = self.open()?;
        let oid = Oid::from_str(revision.as_str()).context("Invalid revision")?;

        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push(oid)?;

        for oid in revwalk {
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            if commit_touches(&repo, &commit, path)? {
                return Ok(Some(oid.into()));
            }
        }
        Ok(None)
    }
}

/// Whether a commit changed `path` (a file, or anything under it when it is
/// a directory), against the first parent.
fn commit_touches(repo: &Repository, commit: &git2::Commit, path: &Path) -> Result<bool> {
    let tree = commit.tree()?;
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

    let mut opts = DiffOptions::new();
    opts.pathspec(path);

    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;
    Ok(diff.deltas().len() > 0)
}

/// Paths a commit changed under `scope`, relative to it, diffed against the
/// first parent (or the empty tree for a root commit).
fn touched_under(repo: &Repository, commit: &git2::Commit, scope: &Path) -> Result<Vec<PathBuf>> {
    let tree = commit.tree()?;
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

    let mut opts = DiffOptions::new();
    if !scope.as_os_str().is_empty() {
        opts.pathspec(scope);
    }

    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;

    let mut touched = Vec::new();
    for delta in diff.deltas() {
        for file in [delta.new_file(), delta.old_file()] {
            let Some(path) = file.path() else { continue };
            let rel = if scope.as_os_str().is_empty() {
                path.to_path_buf()
            } else {
                match path.strip_prefix(scope) {
                    Ok(rel) => rel.to_path_buf(),
                    Err(_) => continue,
                }
            };
            if !rel.as_os_str().is_empty() && !touched.contains(&rel) {
                touched.push(rel);
            }
        }
    }
    Ok(touched)
}
