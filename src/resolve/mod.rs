//! Per-entry last-commit resolution.
//!
//! Given the entry names of one tree level, find for each the most recent
//! commit that touched its path, coordinating many blocking history queries
//! under bounded concurrency. Batch windows of history resolve most entries
//! incidentally; once only a few stragglers remain, targeted per-path lookups
//! finish the job.

mod coordinator;
mod memo;

pub use coordinator::resolve_last_commits;
pub use memo::{Memo, ResolutionRecord};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use crate::history::CommitId;

/// Tuning for one resolution operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Max concurrent history queries; 0 means available hardware parallelism.
    pub concurrency: usize,
    /// Commits consumed per batch scan window.
    pub batch_window: usize,
    /// Switch to direct lookups once `unresolved <= in_flight + threshold`.
    pub switchover_threshold: usize,
    /// Overall deadline for the operation; on expiry a partial result is
    /// returned with [`ResolveError::Timeout`].
    pub deadline: Option<Duration>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            concurrency: 0,
            batch_window: 32,
            switchover_threshold: 4,
            deadline: None,
        }
    }
}

impl ResolveOptions {
    /// Load options from a TOML file. A missing file yields defaults; a
    /// present but invalid one is an error, not silently ignored.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Invalid options file: {}", path.display())),
            Err(_) => Ok(Self::default()),
        }
    }

    pub(crate) fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4)
        }
    }
}

/// Why a resolution operation ended early.
#[derive(Debug)]
pub enum ResolveError {
    /// Deadline expired; the outcome carries whatever had resolved by then.
    Timeout,
    /// History reached its root before every entry resolved. The leftover
    /// entries were never introduced under the scanned directory, a data
    /// inconsistency worth surfacing rather than a crash.
    HistoryExhausted,
    /// An underlying history query failed; the operation aborts without
    /// retrying.
    Query(anyhow::Error),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Timeout => write!(f, "resolution deadline exceeded"),
            ResolveError::HistoryExhausted => {
                write!(f, "history exhausted before all entries resolved")
            }
            ResolveError::Query(cause) => write!(f, "history query failed: {}", cause),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::Query(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// What one resolution operation produced.
#[derive(Debug)]
pub struct ResolveOutcome {
    /// Entry name to last-modifying commit, present only for resolved entries.
    pub resolutions: HashMap<String, CommitId>,
    /// Set when the operation ended early; `resolutions` is then partial.
    pub error: Option<ResolveError>,
}

impl ResolveOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}
