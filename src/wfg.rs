//! Distributed wait-for-graph assembly and cycle detection (C9).
//!
//! The root collects one [`crate::blocking_state::WfgShard`] per blocked
//! rank from across the tree and assembles them into a single graph. A
//! rank is "progressing" if it is not blocked at all, or if its AND/OR
//! wait condition is already satisfied by ranks already known to be
//! progressing. Repeatedly marking progressing ranks to a fixpoint is
//! exactly the standard knot/cycle-detection technique for AND-OR graphs:
//! whatever is left blocked once no further rank can be marked progressing
//! is, by construction, on or behind a cycle — the deadlock core.

use crate::blocking_state::{WaitNode, WfgShard};
use crate::types::Rank;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockReport {
    /// Ranks that can never resolve their wait condition: the deadlock,
    /// in stable rank order.
    pub core: Vec<Rank>,
    /// Ranks found to be progressing (including unblocked ones).
    pub progressing: Vec<Rank>,
}

impl DeadlockReport {
    pub fn is_deadlocked(&self) -> bool {
        !self.core.is_empty()
    }
}

/// Assembles shards into a graph and runs fixpoint cycle detection.
pub struct Wfg {
    shards: HashMap<Rank, WaitNode>,
}

impl Wfg {
    pub fn from_shards(shards: Vec<WfgShard>) -> Self {
        let shards = shards.into_iter().map(|s| (s.rank, s.node)).collect();
        Wfg { shards }
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn blocked_ranks(&self) -> Vec<Rank> {
        let mut ranks: Vec<Rank> = self.shards.keys().copied().collect();
        ranks.sort();
        ranks
    }

    /// Runs the fixpoint computation and returns the resulting deadlock
    /// core (empty if the whole tree can still make progress).
    pub fn detect(&self) -> DeadlockReport {
        let blocked: HashSet<Rank> = self.shards.keys().copied().collect();

        let mut referenced: BTreeSet<Rank> = BTreeSet::new();
        for node in self.shards.values() {
            referenced.extend(node.referenced_ranks());
        }

        let mut progressing: HashSet<Rank> = referenced
            .iter()
            .copied()
            .filter(|r| !blocked.contains(r))
            .collect();

        loop {
            let mut changed = false;
            for (rank, node) in &self.shards {
                if progressing.contains(rank) {
                    continue;
                }
                if Self::node_satisfied(node, &progressing) {
                    progressing.insert(*rank);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut core: Vec<Rank> = blocked.difference(&progressing).copied().collect();
        core.sort();
        let mut progressing_list: Vec<Rank> = progressing.into_iter().collect();
        progressing_list.sort();

        DeadlockReport {
            core,
            progressing: progressing_list,
        }
    }

    fn node_satisfied(node: &WaitNode, progressing: &HashSet<Rank>) -> bool {
        match node {
            WaitNode::Resolved => true,
            WaitNode::Edge(r) => progressing.contains(r),
            WaitNode::And(children) => children.iter().all(|c| Self::node_satisfied(c, progressing)),
            WaitNode::Or(children) => children.iter().any(|c| Self::node_satisfied(c, progressing)),
        }
    }
}
