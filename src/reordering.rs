//! Per-rank operation reordering queue (C5).
//!
//! Generic over the event payload `E` so this module stays oblivious to
//! what a "send", "collective begin" or "blocking op" actually is — the
//! orchestrator in [`crate::node`] owns dispatch into C6/C7/C8. `E` must be
//! `Clone` because [`ReorderingQueue::checkpoint`] snapshots the entire
//! queue state by value; this checkpoint/rollback pair must be invoked as
//! a group alongside the matching engines' checkpoints.

use crate::errors::{CoreError, Result};
use crate::types::Rank;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
struct State<E> {
    queues: HashMap<Rank, VecDeque<E>>,
    open: HashMap<Rank, bool>,
    suspended: bool,
}

impl<E> Default for State<E> {
    fn default() -> Self {
        State {
            queues: HashMap::new(),
            open: HashMap::new(),
            suspended: false,
        }
    }
}

/// Per-rank FIFO of deferred operations plus the global open/suspended
/// gating state, with group checkpoint/rollback.
#[derive(Debug)]
pub struct ReorderingQueue<E: Clone> {
    state: State<E>,
    checkpoints: Vec<State<E>>,
}

impl<E: Clone> Default for ReorderingQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> ReorderingQueue<E> {
    pub fn new() -> Self {
        ReorderingQueue {
            state: State::default(),
            checkpoints: Vec::new(),
        }
    }

    /// A rank is open by default until first blocked.
    pub fn is_open(&self, rank: Rank) -> bool {
        *self.state.open.get(&rank).unwrap_or(&true)
    }

    pub fn is_suspended(&self) -> bool {
        self.state.suspended
    }

    /// Appends `ev` to `rank`'s queue. Returns `true` if the rank is open,
    /// dispatch is not globally suspended, and `ev` landed at the head of
    /// an otherwise-empty queue — i.e. the caller should immediately call
    /// [`Self::pop_ready`] to hand it to the matching engines.
    pub fn enqueue(&mut self, rank: Rank, ev: E) -> bool {
        let queue = self.state.queues.entry(rank).or_default();
        let was_empty = queue.is_empty();
        queue.push_back(ev);
        was_empty && self.is_open(rank) && !self.state.suspended
    }

    /// Pops the head of `rank`'s queue iff the rank is open and dispatch is
    /// not globally suspended. Strict FIFO within a rank.
    pub fn pop_ready(&mut self, rank: Rank) -> Option<E> {
        if self.state.suspended || !self.is_open(rank) {
            return None;
        }
        self.state.queues.get_mut(&rank).and_then(|q| q.pop_front())
    }

    /// All ranks with a non-empty queue, open and unsuspended: candidates
    /// the driver's fair rotation may pick from next.
    pub fn dispatchable_ranks(&self) -> Vec<Rank> {
        if self.state.suspended {
            return Vec::new();
        }
        self.state
            .queues
            .iter()
            .filter(|(rank, q)| !q.is_empty() && self.is_open(**rank))
            .map(|(rank, _)| *rank)
            .collect()
    }

    pub fn queue_len(&self, rank: Rank) -> usize {
        self.state.queues.get(&rank).map_or(0, VecDeque::len)
    }

    /// Closes a rank: it holds a blocking op whose completion depends on
    /// events on other ranks, so the dispatcher must not eagerly run its
    /// future operations past the block.
    pub fn block_rank(&mut self, rank: Rank) {
        self.state.open.insert(rank, false);
    }

    pub fn resume_rank(&mut self, rank: Rank) {
        self.state.open.insert(rank, true);
    }

    /// Globally pauses dispatch, used while wildcard backtracking explores
    /// alternatives.
    pub fn suspend(&mut self) {
        self.state.suspended = true;
    }

    pub fn remove_suspension(&mut self) {
        self.state.suspended = false;
    }

    /// Snapshots the entire queue state as one checkpoint frame. Must be
    /// called alongside matching/blocking-state checkpoints as a single
    /// "checkpoint group"; depth is exposed via [`Self::checkpoint_depth`]
    /// so callers can assert the group stays in lock-step.
    pub fn checkpoint(&mut self) {
        self.checkpoints.push(self.state.clone());
    }

    /// Restores the most recent checkpoint. Errors if none is live.
    pub fn rollback(&mut self) -> Result<()> {
        self.state = self
            .checkpoints
            .pop()
            .ok_or(CoreError::NoLiveCheckpoint)?;
        Ok(())
    }

    /// Discards the most recent checkpoint without restoring it (the
    /// decision it guarded turned out fine).
    pub fn commit(&mut self) -> Result<()> {
        self.checkpoints
            .pop()
            .map(|_| ())
            .ok_or(CoreError::NoLiveCheckpoint)
    }

    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: u32) -> Rank {
        Rank(n)
    }

    #[test]
    fn fifo_within_a_rank() {
        let mut q: ReorderingQueue<i32> = ReorderingQueue::new();
        assert!(q.enqueue(r(0), 1));
        assert!(!q.enqueue(r(0), 2)); // not head of an empty queue anymore
        assert_eq!(q.pop_ready(r(0)), Some(1));
        assert_eq!(q.pop_ready(r(0)), Some(2));
        assert_eq!(q.pop_ready(r(0)), None);
    }

    #[test]
    fn blocked_rank_does_not_dispatch() {
        let mut q: ReorderingQueue<i32> = ReorderingQueue::new();
        q.block_rank(r(0));
        assert!(!q.enqueue(r(0), 1));
        assert_eq!(q.pop_ready(r(0)), None);
        q.resume_rank(r(0));
        assert_eq!(q.pop_ready(r(0)), Some(1));
    }

    #[test]
    fn suspension_blocks_all_ranks() {
        let mut q: ReorderingQueue<i32> = ReorderingQueue::new();
        q.enqueue(r(0), 1);
        q.suspend();
        assert_eq!(q.pop_ready(r(0)), None);
        q.remove_suspension();
        assert_eq!(q.pop_ready(r(0)), Some(1));
    }

    #[test]
    fn rollback_is_total() {
        let mut q: ReorderingQueue<i32> = ReorderingQueue::new();
        q.enqueue(r(0), 1);
        q.checkpoint();
        q.enqueue(r(0), 2);
        q.block_rank(r(1));
        assert_eq!(q.checkpoint_depth(), 1);

        q.rollback().unwrap();
        assert_eq!(q.checkpoint_depth(), 0);
        assert!(q.is_open(r(1)));
        assert_eq!(q.pop_ready(r(0)), Some(1));
        assert_eq!(q.pop_ready(r(0)), None);
    }

    #[test]
    fn rollback_without_checkpoint_errors() {
        let mut q: ReorderingQueue<i32> = ReorderingQueue::new();
        assert!(matches!(q.rollback(), Err(CoreError::NoLiveCheckpoint)));
    }
}
