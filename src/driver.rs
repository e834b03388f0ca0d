//! Single-threaded scheduling driver (C3).
//!
//! Two small, deliberately separate pieces: [`RoundRobin`] picks which
//! ready rank to service next so no rank starves another, and
//! [`CompletionTracker`] generalizes the finalize-notify completion-tree
//! shape to any tree-wide barrier keyed by an epoch number — used for
//! `SYNC`/`FLUSH` acknowledgement as well as finalize. Both are driven
//! from the single cooperative-scheduler task; neither owns any channel
//! or socket itself.

use crate::types::Rank;
use std::collections::{HashMap, HashSet};

/// Fair round-robin cursor over a changing candidate set. Candidates are
/// whatever [`crate::reordering::ReorderingQueue::dispatchable_ranks`]
/// currently reports; order is by rank value, wrapping past the last rank
/// served so no single rank's queue is starved by a more popular one.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last_served: Option<Rank>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks the next rank to service from `candidates`, or `None` if
    /// empty. Does not consume or mutate `candidates`.
    pub fn pick_next(&mut self, candidates: &[Rank]) -> Option<Rank> {
        if candidates.is_empty() {
            return None;
        }
        let mut sorted = candidates.to_vec();
        sorted.sort();

        let chosen = match self.last_served {
            Some(last) => sorted.iter().find(|r| **r > last).copied().unwrap_or(sorted[0]),
            None => sorted[0],
        };
        self.last_served = Some(chosen);
        Some(chosen)
    }
}

/// Tracks completion of a tree-wide barrier (sync, flush, finalize) keyed
/// by an epoch number, generalizing the finalize completion tree: a node
/// reports complete to its parent exactly once per epoch, the moment its
/// own contribution and every expected child's have arrived.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    expected_children: HashSet<u32>,
    self_done: HashMap<u64, bool>,
    children_done: HashMap<u64, HashSet<u32>>,
}

impl CompletionTracker {
    pub fn new(expected_children: HashSet<u32>) -> Self {
        CompletionTracker {
            expected_children,
            self_done: HashMap::new(),
            children_done: HashMap::new(),
        }
    }

    pub fn mark_self(&mut self, epoch: u64) -> bool {
        let was_complete = self.is_complete(epoch);
        self.self_done.insert(epoch, true);
        !was_complete && self.is_complete(epoch)
    }

    /// Returns `true` exactly once per epoch: the call that completes it.
    pub fn mark_child(&mut self, epoch: u64, child: u32) -> bool {
        if !self.expected_children.contains(&child) {
            return false;
        }
        let was_complete = self.is_complete(epoch);
        self.children_done.entry(epoch).or_default().insert(child);
        !was_complete && self.is_complete(epoch)
    }

    pub fn is_complete(&self, epoch: u64) -> bool {
        let self_ok = *self.self_done.get(&epoch).unwrap_or(&false);
        let children_ok = self
            .children_done
            .get(&epoch)
            .is_some_and(|done| self.expected_children.is_subset(done));
        self_ok && children_ok
    }

    /// Drops bookkeeping for `epoch` once it has been forwarded upward.
    pub fn clear(&mut self, epoch: u64) {
        self.self_done.remove(&epoch);
        self.children_done.remove(&epoch);
    }
}
