//! Tree entries: classification, display ordering, and one-level snapshot
//! listing.

use anyhow::{anyhow, Context, Result};
use git2::{ObjectType, Oid, Repository};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::history::{CommitId, GitHistory};
use crate::resolve::{resolve_last_commits, ResolveOptions, ResolveOutcome};

/// The type of an object in a git tree. These look like unix file modes but
/// git only allows this fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Exec,
    Symlink,
    Submodule,
    Tree,
}

impl EntryKind {
    pub fn from_filemode(mode: i32) -> Option<Self> {
        match mode {
            0o100644 => Some(EntryKind::Blob),
            0o100755 => Some(EntryKind::Exec),
            0o120000 => Some(EntryKind::Symlink),
            0o160000 => Some(EntryKind::Submodule),
            0o040000 => Some(EntryKind::Tree),
            _ => None,
        }
    }
}

/// One leaf of a git tree, immutable once listed.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Path segment within the listed directory.
    pub name: String,
    pub kind: EntryKind,
    /// Object hash, hex. For submodules this is the linked commit.
    pub id: String,
    /// Blob size in bytes; `None` for trees and submodules.
    pub size: Option<u64>,
}

impl TreeEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Tree
    }

    pub fn is_submodule(&self) -> bool {
        self.kind == EntryKind::Submodule
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}

type OrderRule = fn(&TreeEntry, &TreeEntry) -> Ordering;

/// Tie-break rules tried in order; the first that distinguishes wins.
const ORDER_RULES: &[OrderRule] = &[
    // Directories and submodules group before files.
    |a, b| (b.is_dir() || b.is_submodule()).cmp(&(a.is_dir() || a.is_submodule())),
    // Then plain name order.
    |a, b| a.name.cmp(&b.name),
];

pub fn compare_entries(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    for rule in ORDER_RULES {
        match rule(a, b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Sort entries for display: directories and submodules first, then by name.
pub fn sort_entries(entries: &mut [TreeEntry]) {
    entries.sort_by(compare_entries);
}

/// A one-level listing of a repository directory at a fixed revision.
///
/// The snapshot owns its entries together with the context they were listed
/// from (repository path, revision, directory); entries carry no reference
/// back. Snapshots are built for one resolution operation and discarded;
/// nothing persists across operations.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    pub repo_path: PathBuf,
    pub revision: CommitId,
    /// Directory the entries live in, relative to the repository root.
    /// Empty for the root itself.
    pub dir: PathBuf,
    pub entries: Vec<TreeEntry>,
}

impl TreeSnapshot {
    /// List the entries of `dir` as of `revision`, sorted for display.
    pub fn list(repo_path: &Path, revision: &CommitId, dir: &Path) -> Result<Self> {
        let repo = Repository::open(repo_path).context("Failed to open repository")?;
        let oid = Oid::from_str(revision.as_str()).context("Invalid revision")?;
        let commit = repo.find_commit(oid).context("Revision is not a commit")?;
        let root = commit.tree()?;

        let tree = if dir.as_os_str().is_empty() {
            root
        } else {
            let entry = root
                .get_path(dir)
                .with_context(|| format!("No such path at revision: {}", dir.display()))?;
            if entry.kind() != Some(ObjectType::Tree) {
                return Err(anyhow!("Not a directory: {}", dir.display()));
            }
            repo.find_tree(entry.id())?
        };

        let mut entries = Vec::with_capacity(tree.len());
        for te in tree.iter() {
            let Some(kind) = EntryKind::from_filemode(te.filemode()) else {
                continue;
            };
            let name = match te.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            let size = match kind {
                EntryKind::Blob | EntryKind::Exec | EntryKind::Symlink => {
                    repo.find_blob(te.id()).ok().map(|b| b.size() as u64)
                }
                EntryKind::Submodule | EntryKind::Tree => None,
            };
            entries.push(TreeEntry {
                name,
                kind,
                id: te.id().to_string(),
                size,
            });
        }
        sort_entries(&mut entries);

        Ok(Self {
            repo_path: repo_path.to_path_buf(),
            revision: revision.clone(),
            dir: dir.to_path_buf(),
            entries,
        })
    }

    /// Entry names in listed (sorted) order.
    pub fn entry_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Collapse a chain of single-subdirectory trees below `entry` into one
    /// jumpable path: "src" becomes "src/only/child" when each level holds
    /// nothing but the next directory. Returns the entry's own name when
    /// there is nothing to collapse, and `None` for non-directory entries.
    pub fn sub_jumpable_path(&self, entry: &TreeEntry) -> Result<Option<String>> {
        if !entry.is_dir() {
            return Ok(None);
        }
        let repo = Repository::open(&self.repo_path).context("Failed to open repository")?;
        let mut path = entry.name.clone();
        let mut oid = Oid::from_str(&entry.id).context("Invalid object id")?;

        loop {
            let tree = repo.find_tree(oid)?;
            if tree.len() != 1 {
                break;
            }
            let Some(child) = tree.get(0) else { break };
            if EntryKind::from_filemode(child.filemode()) != Some(EntryKind::Tree) {
                break;
            }
            let Some(name) = child.name() else { break };
            path.push('/');
            path.push_str(name);
            oid = child.id();
        }
        Ok(Some(path))
    }

    /// Resolve, for every entry, the most recent commit that touched its
    /// path, against this snapshot's own repository.
    pub async fn resolve_last_commits(&self, options: &ResolveOptions) -> ResolveOutcome {
        let history = Arc::new(GitHistory::new(&self.repo_path));
        resolve_last_commits(
            history,
            self.entry_names(),
            &self.revision,
            &self.dir,
            options,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: EntryKind) -> TreeEntry {
        TreeEntry {
            name: name.to_string(),
            kind,
            id: "0".repeat(40),
            size: None,
        }
    }

    #[test]
    fn directories_and_submodules_sort_before_files() {
        let mut entries = vec![
            entry("zz.rs", EntryKind::Blob),
            entry("vendor", EntryKind::Submodule),
            entry("a.rs", EntryKind::Blob),
            entry("src", EntryKind::Tree),
            entry("run.sh", EntryKind::Exec),
        ];
        sort_entries(&mut entries);

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["src", "vendor", "a.rs", "run.sh", "zz.rs"]);
    }

    #[test]
    fn name_order_breaks_ties_within_a_group() {
        let mut entries = vec![
            entry("b", EntryKind::Tree),
            entry("a", EntryKind::Tree),
            entry("d.txt", EntryKind::Blob),
            entry("c.txt", EntryKind::Blob),
        ];
        sort_entries(&mut entries);

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c.txt", "d.txt"]);
    }

    fn setup_test_repo() -> (tempfile::TempDir, PathBuf) {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let repo_path = temp_dir.path().to_path_buf();
        Repository::init(&repo_path).expect("Failed to init repo");

        let repo = Repository::open(&repo_path).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();

        (temp_dir, repo_path)
    }

    fn commit_test_file(repo_path: &Path, rel_path: &str, content: &str, message: &str) -> CommitId {
        let full_path = repo_path.join(rel_path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&full_path, content).unwrap();

        let repo = Repository::open(repo_path).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(rel_path)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let sig = git2::Signature::now("Test User", "test@example.com").unwrap();
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
        oid.into()
    }

    fn head_commit(repo_path: &Path) -> CommitId {
        let repo = Repository::open(repo_path).unwrap();
        let oid = repo.head().unwrap().peel_to_commit().unwrap().id();
        oid.into()
    }

    #[test]
    fn list_classifies_sorts_and_sizes() {
        let (_tmp, repo_path) = setup_test_repo();
        commit_test_file(&repo_path, "src/lib.rs", "pub fn f() {}", "add lib");
        commit_test_file(&repo_path, "readme.md", "hello", "add readme");

        let snapshot =
            TreeSnapshot::list(&repo_path, &head_commit(&repo_path), Path::new("")).unwrap();

        let names: Vec<&str> = snapshot.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["src", "readme.md"]);

        assert_eq!(snapshot.entries[0].kind, EntryKind::Tree);
        assert_eq!(snapshot.entries[0].size, None);
        assert_eq!(snapshot.entries[1].kind, EntryKind::Blob);
        assert_eq!(snapshot.entries[1].size, Some("hello".len() as u64));
    }

    #[test]
    fn list_rejects_missing_and_non_directory_paths() {
        let (_tmp, repo_path) = setup_test_repo();
        commit_test_file(&repo_path, "file.txt", "x", "add file");
        let head = head_commit(&repo_path);

        assert!(TreeSnapshot::list(&repo_path, &head, Path::new("nope")).is_err());
        assert!(TreeSnapshot::list(&repo_path, &head, Path::new("file.txt")).is_err());
    }

    #[test]
    fn sub_jumpable_path_collapses_single_child_chains() {
        let (_tmp, repo_path) = setup_test_repo();
        commit_test_file(&repo_path, "src/only/inner/file.txt", "x", "deep chain");
        commit_test_file(&repo_path, "multi/a.txt", "x", "sibling file");
        commit_test_file(&repo_path, "multi/b/c.txt", "x", "sibling dir");
        commit_test_file(&repo_path, "top.txt", "x", "plain file");

        let snapshot =
            TreeSnapshot::list(&repo_path, &head_commit(&repo_path), Path::new("")).unwrap();
        let find = |name: &str| {
            snapshot
                .entries
                .iter()
                .find(|e| e.name == name)
                .unwrap()
                .clone()
        };

        // Each level under "src" holds exactly one directory.
        let jumpable = snapshot.sub_jumpable_path(&find("src")).unwrap();
        assert_eq!(jumpable.as_deref(), Some("src/only/inner"));

        // "multi" has two children, so there is nothing to collapse.
        let multi = snapshot.sub_jumpable_path(&find("multi")).unwrap();
        assert_eq!(multi.as_deref(), Some("multi"));

        // Files are not jumpable at all.
        let plain = snapshot.sub_jumpable_path(&find("top.txt")).unwrap();
        assert_eq!(plain, None);
    }

    #[tokio::test]
    async fn snapshot_resolves_last_commits_end_to_end() {
        let (_tmp, repo_path) = setup_test_repo();
        let c1 = commit_test_file(&repo_path, "docs/a.md", "v1", "add a");
        commit_test_file(&repo_path, "docs/b.md", "v1", "add b");
        let c3 = commit_test_file(&repo_path, "docs/b.md", "v2", "touch b again");
        commit_test_file(&repo_path, "unrelated.txt", "x", "noise");

        let snapshot =
            TreeSnapshot::list(&repo_path, &head_commit(&repo_path), Path::new("docs")).unwrap();
        let outcome = snapshot
            .resolve_last_commits(&ResolveOptions::default())
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.resolutions.get("a.md"), Some(&c1));
        assert_eq!(outcome.resolutions.get("b.md"), Some(&c3));
    }

    #[test]
    fn entry_kind_from_filemode() {
        assert_eq!(EntryKind::from_filemode(0o100644), Some(EntryKind::Blob));
        assert_eq!(EntryKind::from_filemode(0o100755), Some(EntryKind::Exec));
        assert_eq!(EntryKind::from_filemode(0o120000), Some(EntryKind::Symlink));
        assert_eq!(
            EntryKind::from_filemode(0o160000),
            Some(EntryKind::Submodule)
        );
        assert_eq!(EntryKind::from_filemode(0o040000), Some(EntryKind::Tree));
        assert_eq!(EntryKind::from_filemode(0), None);
    }
}
