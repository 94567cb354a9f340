//! treeblame: per-entry last-modifying-commit resolution for git trees.
//!
//! Given one level of a repository tree, find for every entry the most recent
//! commit that touched its path, without re-walking the full history once per
//! entry. Batch windows of history resolve most entries incidentally; the
//! few stragglers get targeted lookups, all under bounded concurrency.

pub mod entry;
pub mod history;
pub mod resolve;
