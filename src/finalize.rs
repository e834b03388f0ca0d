//! Finalize-time draining and panic propagation (C11).
//!
//! A finalize-notify completion tree mirrors the TBON: a node only
//! forwards its own FINALIZE upward once every child has also reported
//! in. Once the root sees the whole tree finalized it triggers the final
//! drain, which surfaces any point-to-point operation that never matched
//! as a lost message. Panic propagates the opposite way: any node may
//! trigger it, it floods the whole tree exactly once, and a second
//! trigger (local or relayed) is a no-op.

use crate::p2p_match::{P2pMatcher, P2pOp};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostKind {
    UnmatchedSend,
    UnmatchedRecv,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostMessage {
    pub op: P2pOp,
    pub kind: LostKind,
}

/// Tracks which of this node's children (and this node itself) have
/// reported FINALIZE, so the node knows when to forward its own upward.
#[derive(Debug)]
pub struct FinalizeTracker {
    expected_children: HashSet<u32>,
    finalized_children: HashSet<u32>,
    self_finalized: bool,
    panicked: bool,
}

impl FinalizeTracker {
    pub fn new(expected_children: HashSet<u32>) -> Self {
        FinalizeTracker {
            expected_children,
            finalized_children: HashSet::new(),
            self_finalized: false,
            panicked: false,
        }
    }

    pub fn mark_self_finalized(&mut self) {
        self.self_finalized = true;
    }

    /// Records a child's FINALIZE. Returns `true` exactly once — the call
    /// that completes the set — telling the caller to forward FINALIZE to
    /// its own parent (or, at the root, to start the drain).
    pub fn mark_child_finalized(&mut self, child: u32) -> bool {
        if !self.expected_children.contains(&child) {
            return false;
        }
        let was_complete = self.all_finalized();
        self.finalized_children.insert(child);
        !was_complete && self.all_finalized()
    }

    pub fn all_finalized(&self) -> bool {
        self.self_finalized && self.expected_children.is_subset(&self.finalized_children)
    }

    /// Marks panic as triggered. Returns `true` the first time only, so a
    /// relayed NOTIFY_PANIC that arrives after this node already panicked
    /// is not re-broadcast.
    pub fn trigger_panic(&mut self) -> bool {
        if self.panicked {
            return false;
        }
        self.panicked = true;
        true
    }

    pub fn is_panicked(&self) -> bool {
        self.panicked
    }
}

/// Drains a point-to-point matcher at finalize, returning every send and
/// receive that never found a partner.
pub fn drain_lost_messages(matcher: &mut P2pMatcher) -> Vec<LostMessage> {
    let (sends, recvs) = matcher.drain_unmatched();
    sends
        .into_iter()
        .map(|op| LostMessage { op, kind: LostKind::UnmatchedSend })
        .chain(recvs.into_iter().map(|op| LostMessage { op, kind: LostKind::UnmatchedRecv }))
        .collect()
}
