//! Resolution bookkeeping, owned exclusively by the coordinator.

use std::collections::HashMap;

use crate::history::CommitId;

/// Per-entry resolution state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionRecord {
    Unresolved,
    Resolved(CommitId),
}

/// Entry name to resolution state, with cardinality fixed at creation.
///
/// First write wins: scanning runs newest to oldest, so the first commit seen
/// for a path is its nearest ancestor and must never be overwritten.
#[derive(Debug)]
pub struct Memo {
    /// Names in listing order; drives the direct-resolution claim order.
    names: Vec<String>,
    records: HashMap<String, ResolutionRecord>,
    resolved: usize,
    claim_cursor: usize,
}

impl Memo {
    pub fn new(names: Vec<String>) -> Self {
        let records = names
            .iter()
            .map(|n| (n.clone(), ResolutionRecord::Unresolved))
            .collect();
        Self {
            names,
            records,
            resolved: 0,
            claim_cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn unresolved_count(&self) -> usize {
        self.names.len() - self.resolved
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.unresolved_count() == 0
    }

    pub fn record(&self, name: &str) -> Option<&ResolutionRecord> {
        self.records.get(name)
    }

    /// Record a resolution. No-op for unknown or already-resolved names.
    /// Returns true when the entry was newly resolved.
    pub fn mark_resolved(&mut self, name: &str, commit: CommitId) -> bool {
        match self.records.get_mut(name) {
            Some(record @ ResolutionRecord::Unresolved) => {
                *record = ResolutionRecord::Resolved(commit);
                self.resolved += 1;
                true
            }
            _ => false,
        }
    }

    /// Claim the next unresolved entry for direct resolution. The cursor only
    /// ever advances, so a name is never handed out twice and at most one
    /// in-flight task targets a given entry.
    pub fn claim_next_unresolved(&mut self) -> Option<String> {
        while self.claim_cursor < self.names.len() {
            let name = &self.names[self.claim_cursor];
            self.claim_cursor += 1;
            if matches!(self.records.get(name), Some(ResolutionRecord::Unresolved)) {
                return Some(name.clone());
            }
        }
        None
    }

    /// Final mapping, resolved entries only.
    pub fn into_resolutions(self) -> HashMap<String, CommitId> {
        self.records
            .into_iter()
            .filter_map(|(name, record)| match record {
                ResolutionRecord::Resolved(commit) => Some((name, commit)),
                ResolutionRecord::Unresolved => None,
            })
            .collect()
    }
}
