//! Per-rank blocking-state tracker and wait-for-graph shard builder (C8).
//!
//! A rank enters a [`BlockingOp`] when it issues a blocking MPI call (or a
//! blocking wait over a request set); [`crate::p2p_match`] and
//! [`crate::coll_match`] are consulted by the caller to work out which
//! other ranks could unblock it, and that candidate set is handed in here
//! as-is. This module's only job is folding the operation's AND/OR/Mixed
//! shape into a single [`WaitNode`] tree for [`crate::wfg`] to assemble
//! into the global graph, and remembering which rank is blocked on what so
//! a later completion can clear it.

use crate::errors::{CoreError, Result};
use crate::types::{CollId, ContextId, Rank, ReqId};
use std::collections::HashMap;

/// A node in the wait-for-graph contributed by one rank's blocking op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitNode {
    /// Waiting on a single other rank to make progress.
    Edge(Rank),
    /// Every child must resolve before this rank unblocks (barrier, waitall).
    And(Vec<WaitNode>),
    /// Any one child resolving unblocks this rank (wildcard recv, waitany).
    Or(Vec<WaitNode>),
    /// Already resolved; contributes no wait-for edges (e.g. completed
    /// request still present in a waitsome set, or a call that never
    /// blocks in the first place).
    Resolved,
}

impl WaitNode {
    /// Ranks this node transitively depends on, used to detect whether a
    /// completion event is relevant to a blocked rank at all.
    pub fn referenced_ranks(&self) -> Vec<Rank> {
        match self {
            WaitNode::Edge(r) => vec![*r],
            WaitNode::And(children) | WaitNode::Or(children) => {
                children.iter().flat_map(WaitNode::referenced_ranks).collect()
            }
            WaitNode::Resolved => Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, WaitNode::Resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    WaitAll,
    WaitAny,
    /// Partial completion over a request set; modeled as OR since any one
    /// completing makes progress, same as waitany.
    WaitSome,
}

/// The blocking operation a rank is suspended on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockingOp {
    /// Blocked on a point-to-point match. `candidates` is the set of ranks
    /// whose pending send could satisfy it: one entry for a specific-source
    /// receive, several for a wildcard receive still ambiguous in
    /// [`crate::p2p_match`].
    P2P { req: ReqId, candidates: Vec<Rank> },
    /// Blocked on a collective wave. `awaiting` is every participant that
    /// has not yet contributed.
    Coll {
        comm: ContextId,
        coll: CollId,
        wave: u32,
        awaiting: Vec<Rank>,
    },
    /// Blocked on a set of requests, combined per `mode`.
    Completion {
        requests: Vec<BlockingOp>,
        mode: CompletionMode,
    },
    /// A pre-assembled mixed AND/OR shape, for callers that already know
    /// the tree (e.g. a generalized request).
    Mixed(WaitNode),
}

impl BlockingOp {
    fn to_wait_node(&self) -> WaitNode {
        match self {
            BlockingOp::P2P { candidates, .. } => {
                if candidates.is_empty() {
                    WaitNode::Resolved
                } else if candidates.len() == 1 {
                    WaitNode::Edge(candidates[0])
                } else {
                    WaitNode::Or(candidates.iter().copied().map(WaitNode::Edge).collect())
                }
            }
            BlockingOp::Coll { awaiting, .. } => {
                if awaiting.is_empty() {
                    WaitNode::Resolved
                } else {
                    WaitNode::And(awaiting.iter().copied().map(WaitNode::Edge).collect())
                }
            }
            BlockingOp::Completion { requests, mode } => {
                let children: Vec<WaitNode> = requests
                    .iter()
                    .map(BlockingOp::to_wait_node)
                    .filter(|n| !n.is_resolved())
                    .collect();
                if children.is_empty() {
                    WaitNode::Resolved
                } else {
                    match mode {
                        CompletionMode::WaitAll => WaitNode::And(children),
                        CompletionMode::WaitAny | CompletionMode::WaitSome => WaitNode::Or(children),
                    }
                }
            }
            BlockingOp::Mixed(node) => node.clone(),
        }
    }
}

/// One rank's contribution to the global wait-for-graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WfgShard {
    pub rank: Rank,
    pub node: WaitNode,
}

#[derive(Debug, Clone, Default)]
struct State {
    blocked: HashMap<Rank, BlockingOp>,
}

#[derive(Debug, Default)]
pub struct BlockingStateTracker {
    state: State,
    checkpoints: Vec<State>,
}

impl BlockingStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `rank` blocked on `op`, returning the shard to hand to the WFG.
    pub fn begin_blocking(&mut self, rank: Rank, op: BlockingOp) -> WfgShard {
        let node = op.to_wait_node();
        self.state.blocked.insert(rank, op);
        WfgShard { rank, node }
    }

    /// Clears `rank`'s blocking state, e.g. once its operation completes.
    pub fn end_blocking(&mut self, rank: Rank) -> Option<BlockingOp> {
        self.state.blocked.remove(&rank)
    }

    pub fn is_blocked(&self, rank: Rank) -> bool {
        self.state.blocked.contains_key(&rank)
    }

    pub fn current_op(&self, rank: Rank) -> Option<&BlockingOp> {
        self.state.blocked.get(&rank)
    }

    /// Current shard for every blocked rank, for rebuilding the WFG from
    /// scratch (e.g. after a resumed consistent-snapshot epoch).
    pub fn all_shards(&self) -> Vec<WfgShard> {
        let mut shards: Vec<WfgShard> = self
            .state
            .blocked
            .iter()
            .map(|(rank, op)| WfgShard {
                rank: *rank,
                node: op.to_wait_node(),
            })
            .collect();
        shards.sort_by_key(|s| s.rank);
        shards
    }

    pub fn blocked_count(&self) -> usize {
        self.state.blocked.len()
    }

    pub fn checkpoint(&mut self) {
        self.checkpoints.push(self.state.clone());
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.state = self.checkpoints.pop().ok_or(CoreError::NoLiveCheckpoint)?;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.checkpoints.pop().map(|_| ()).ok_or(CoreError::NoLiveCheckpoint)
    }
}
