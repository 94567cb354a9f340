//! The scheduling loop: bounded concurrent history queries, one completion
//! channel, single-owner state.
//!
//! # Ownership discipline
//!
//! All mutable state (the memo, the batch cursor, the claim cursor, the
//! in-flight count) lives in the [`Coordinator`] and is only touched while
//! processing completion events. Workers receive owned parameters at dispatch
//! time and report exactly one [`TaskResult`] back over the channel; they
//! never negotiate shared state among themselves. Every task outcome,
//! including failure, travels as one tagged variant on that single channel.
//!
//! # Error handling
//!
//! Worker channel sends use `let _ =`: if the receiver is gone the operation
//! has already returned and nobody is listening for the result.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task;
use tokio::time::Instant;

use super::memo::Memo;
use super::{ResolveError, ResolveOptions, ResolveOutcome};
use crate::history::{CommitId, CommitTouches, HistoryQuery};

/// One completed task, reported over the completion channel.
enum TaskResult {
    /// A batch scan window. `seq` is the dispatch sequence number; windows
    /// are applied strictly in `seq` order so first-touch-wins reflects true
    /// newest-to-oldest traversal no matter which task finishes first.
    Batch { seq: u64, items: Vec<CommitTouches> },
    /// A targeted lookup for one entry. `None` means no ancestor ever
    /// touched the path; the entry resolves to the base revision by
    /// convention, since it does exist in the snapshot.
    Direct {
        name: String,
        commit: Option<CommitId>,
    },
    Failed { cause: anyhow::Error },
}

/// Resolve, for every name in `names`, the most recent commit at or below
/// `base_revision` that touched `base_dir/<name>`.
///
/// Entries are resolved incidentally by batch windows scanning backward from
/// `base_revision`; once few remain relative to work already running
/// (`unresolved <= in_flight + switchover_threshold`), the remaining names
/// get one targeted query each. At most `options.concurrency` queries run at
/// once. The answer for a fixed path is deterministic regardless of
/// concurrency: it is defined by nearest-ancestor-in-history, and scheduling
/// only affects throughput.
///
/// The returned outcome is partial when the deadline expires, a query fails,
/// or history runs out first; in-flight work is always drained before
/// returning so no worker outlives the call.
pub async fn resolve_last_commits(
    history: Arc<dyn HistoryQuery>,
    names: Vec<String>,
    base_revision: &CommitId,
    base_dir: &Path,
    options: &ResolveOptions,
) -> ResolveOutcome {
    let memo = Memo::new(names);
    if memo.is_empty() {
        return ResolveOutcome {
            resolutions: HashMap::new(),
            error: None,
        };
    }

    let max_in_flight = options.effective_concurrency().max(1);
    // Each in-flight task sends exactly one message, so this never blocks.
    let (tx, rx) = mpsc::channel(max_in_flight);
    let deadline = options.deadline.map(|d| Instant::now() + d);

    let coordinator = Coordinator {
        history,
        base_revision: base_revision.clone(),
        base_dir: base_dir.to_path_buf(),
        window: options.batch_window.max(1),
        threshold: options.switchover_threshold,
        max_in_flight,
        memo,
        tx,
        rx,
        in_flight: 0,
        next_skip: 0,
        next_batch_seq: 0,
        next_apply_seq: 0,
        pending_batches: BTreeMap::new(),
        history_exhausted: false,
        error: None,
    };
    coordinator.run(deadline).await
}

struct Coordinator {
    history: Arc<dyn HistoryQuery>,
    base_revision: CommitId,
    base_dir: PathBuf,
    window: usize,
    threshold: usize,
    max_in_flight: usize,

    memo: Memo,
    tx: mpsc::Sender<TaskResult>,
    rx: mpsc::Receiver<TaskResult>,
    in_flight: usize,

    /// Batch cursor: commits already covered by dispatched windows. Advanced
    /// synchronously at dispatch, never by a worker.
    next_skip: usize,
    next_batch_seq: u64,
    /// Next window sequence number eligible for application.
    next_apply_seq: u64,
    /// Windows that completed ahead of an earlier, still-running one.
    pending_batches: BTreeMap<u64, Vec<CommitTouches>>,
    history_exhausted: bool,

    error: Option<ResolveError>,
}

impl Coordinator {
    async fn run(mut self, deadline: Option<Instant>) -> ResolveOutcome {
        while self.error.is_none() && !self.memo.is_fully_resolved() {
            self.dispatch();
            if self.in_flight == 0 {
                // Nothing running and nothing dispatchable: history is
                // exhausted with entries left over.
                break;
            }
            match self.recv(deadline).await {
                Some(result) => self.apply(result),
                None => self.error = Some(ResolveError::Timeout),
            }
        }

        self.drain().await;

        if self.error.is_none() && !self.memo.is_fully_resolved() {
            self.error = Some(ResolveError::HistoryExhausted);
        }
        ResolveOutcome {
            resolutions: self.memo.into_resolutions(),
            error: self.error,
        }
    }

    /// Issue tasks until the pool is full or there is nothing left to start.
    fn dispatch(&mut self) {
        while self.error.is_none()
            && !self.memo.is_fully_resolved()
            && self.in_flight < self.max_in_flight
        {
            // Once history has run out, anything still unresolved was never
            // introduced under the directory. Promoting those entries to
            // direct lookups would resolve them to the base revision and
            // mask the inconsistency; they stay unresolved and the outcome
            // reports the exhaustion instead.
            if self.history_exhausted {
                break;
            }
            if self.memo.unresolved_count() <= self.in_flight.saturating_add(self.threshold) {
                // Few entries remain relative to work already running: a
                // targeted query per straggler beats another deep window.
                let Some(name) = self.memo.claim_next_unresolved() else {
                    break;
                };
                self.spawn_direct(name);
            } else {
                self.spawn_batch();
            }
        }
    }

    fn spawn_batch(&mut self) {
        let seq = self.next_batch_seq;
        self.next_batch_seq += 1;
        let skip = self.next_skip;
        self.next_skip += self.window;

        let history = Arc::clone(&self.history);
        let revision = self.base_revision.clone();
        let dir = self.base_dir.clone();
        let window = self.window;
        let tx = self.tx.clone();
        task::spawn_blocking(move || {
            let result = match history.scan_history(&revision, &dir, skip, window) {
                Ok(items) => TaskResult::Batch { seq, items },
                Err(cause) => TaskResult::Failed { cause },
            };
            let _ = tx.blocking_send(result);
        });
        self.in_flight += 1;
    }

    fn spawn_direct(&mut self, name: String) {
        let history = Arc::clone(&self.history);
        let revision = self.base_revision.clone();
        let path = self.base_dir.join(&name);
        let tx = self.tx.clone();
        task::spawn_blocking(move || {
            let result = match history.latest_commit_for_path(&revision, &path) {
                Ok(commit) => TaskResult::Direct { name, commit },
                Err(cause) => TaskResult::Failed { cause },
            };
            let _ = tx.blocking_send(result);
        });
        self.in_flight += 1;
    }

    /// Wait for one completion; `None` means the deadline expired.
    async fn recv(&mut self, deadline: Option<Instant>) -> Option<TaskResult> {
        match deadline {
            Some(at) => tokio::time::timeout_at(at, self.rx.recv())
                .await
                .ok()
                .flatten(),
            None => self.rx.recv().await,
        }
    }

    fn apply(&mut self, result: TaskResult) {
        self.in_flight -= 1;
        match result {
            TaskResult::Batch { seq, items } => {
                self.pending_batches.insert(seq, items);
                while let Some(items) = self.pending_batches.remove(&self.next_apply_seq) {
                    self.next_apply_seq += 1;
                    self.apply_batch(items);
                }
            }
            TaskResult::Direct { name, commit } => {
                let commit = commit.unwrap_or_else(|| self.base_revision.clone());
                self.memo.mark_resolved(&name, commit);
            }
            TaskResult::Failed { cause } => {
                if self.error.is_none() {
                    self.error = Some(ResolveError::Query(cause));
                }
            }
        }
    }

    /// Apply one window's commits, newest first. A touched path resolves the
    /// entry it lives under (its first component relative to the base
    /// directory); the memo ignores anything already resolved.
    fn apply_batch(&mut self, items: Vec<CommitTouches>) {
        if items.len() < self.window {
            self.history_exhausted = true;
        }
        for item in items {
            for path in &item.touched {
                if let Some(name) = first_component(path) {
                    self.memo.mark_resolved(name, item.commit.clone());
                }
            }
        }
    }

    /// Await every in-flight task before returning, discarding results, so
    /// no worker outlives the operation.
    async fn drain(&mut self) {
        while self.in_flight > 0 {
            match self.rx.recv().await {
                Some(_) => self.in_flight -= 1,
                None => break,
            }
        }
    }
}

fn first_component(path: &Path) -> Option<&str> {
    path.components().next().and_then(|c| c.as_os_str().to_str())
}
