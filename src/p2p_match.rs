//! Point-to-point matching engine (C6).
//!
//! Maintains, per communicator and destination rank, one FIFO of unmatched
//! sends per source rank plus a FIFO of waiting non-wildcard receives per
//! source and a FIFO of waiting wildcard receives. Per-pair send order is
//! never reordered: a wildcard receive may only ever consider the *head* of
//! each source's queue, so a later send from the same source can never be
//! matched ahead of an earlier one. When more than one source has an
//! eligible head, the choice is nondeterministic and recorded on a
//! [`MatchExplorer`] so [`crate::blocking_state`] can backtrack through the
//! alternatives on rollback.

use crate::errors::{CoreError, Result};
use crate::match_explorer::MatchExplorer;
use crate::types::{CallSite, ContextId, Peer, Rank, ReqId, Tag, TypeDigest};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2pOp {
    pub req: ReqId,
    pub rank: Rank,
    pub peer: Peer,
    pub tag: Tag,
    pub comm: ContextId,
    pub type_digest: TypeDigest,
    pub site: CallSite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPair {
    pub send: P2pOp,
    pub recv: P2pOp,
    /// True if the send's typemap does not fit the receive's. A matched
    /// pair is still a match — type mismatches are diagnosed, not blocked.
    pub type_mismatch: bool,
}

type DestKey = (ContextId, Rank);
type PairKey = (ContextId, Rank, Rank);

#[derive(Debug, Clone, Default)]
struct State {
    pending_sends: HashMap<DestKey, HashMap<Rank, VecDeque<P2pOp>>>,
    waiting_specific: HashMap<PairKey, VecDeque<P2pOp>>,
    waiting_wild: HashMap<DestKey, VecDeque<P2pOp>>,
    explorers: HashMap<DestKey, MatchExplorer>,
}

#[derive(Debug, Default)]
pub struct P2pMatcher {
    state: State,
    checkpoints: Vec<State>,
}

impl P2pMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits a send; returns the completed match if a waiting receive
    /// (specific or wildcard) is already eligible, else the send is queued.
    pub fn submit_send(&mut self, send: P2pOp) -> Result<Option<MatchedPair>> {
        debug_assert!(matches!(send.tag, Tag::Value(_)), "a send tag is never a wildcard");
        let dest = send.peer.rank().ok_or_else(|| {
            CoreError::MatchingAmbiguity {
                comm: send.comm.0,
                detail: "send destination must be a concrete rank".to_string(),
            }
        })?;

        if let Some(recv) = self.take_specific_recv(send.comm, dest, send.rank, &send.tag) {
            return Ok(Some(self.finalize(send, recv)));
        }
        if let Some(recv) = self.take_wild_recv(send.comm, dest) {
            return Ok(Some(self.finalize(send, recv)));
        }

        self.state
            .pending_sends
            .entry((send.comm, dest))
            .or_default()
            .entry(send.rank)
            .or_default()
            .push_back(send);
        Ok(None)
    }

    /// Submits a receive. A non-wildcard receive only ever looks at the head
    /// of its source's pending queue. A wildcard receive considers the head
    /// of every source's queue; when more than one is eligible the pick is
    /// driven by this destination's [`MatchExplorer`].
    pub fn submit_recv(&mut self, recv: P2pOp) -> Result<Option<MatchedPair>> {
        let dest = recv.rank;
        match recv.peer {
            Peer::Rank(src) => {
                if let Some(send) = self.take_pending_send_from(recv.comm, dest, src, &recv.tag) {
                    return Ok(Some(self.finalize(send, recv)));
                }
                self.state
                    .waiting_specific
                    .entry((recv.comm, dest, src))
                    .or_default()
                    .push_back(recv);
                Ok(None)
            }
            Peer::Any => {
                if let Some(send) = self.pick_wild_candidate(recv.comm, dest, &recv.tag)? {
                    return Ok(Some(self.finalize(send, recv)));
                }
                self.state
                    .waiting_wild
                    .entry((recv.comm, dest))
                    .or_default()
                    .push_back(recv);
                Ok(None)
            }
            Peer::ProcNull => Ok(None),
        }
    }

    /// A typemap mismatch never blocks a match: the pair is always
    /// completed, with `type_mismatch` set so the caller can publish a
    /// diagnostic the way a collective parameter mismatch is diagnosed
    /// without stalling the wave.
    fn finalize(&mut self, send: P2pOp, recv: P2pOp) -> MatchedPair {
        let type_mismatch = !send.type_digest.send_fits_receive(&recv.type_digest);
        MatchedPair { send, recv, type_mismatch }
    }

    fn take_specific_recv(
        &mut self,
        comm: ContextId,
        dest: Rank,
        src: Rank,
        send_tag: &Tag,
    ) -> Option<P2pOp> {
        let Tag::Value(t) = send_tag else { return None };
        let queue = self.state.waiting_specific.get_mut(&(comm, dest, src))?;
        if queue.front().is_some_and(|recv| recv.tag.matches_send(*t)) {
            queue.pop_front()
        } else {
            None
        }
    }

    fn take_wild_recv(&mut self, comm: ContextId, dest: Rank) -> Option<P2pOp> {
        let queue = self.state.waiting_wild.get_mut(&(comm, dest))?;
        queue.pop_front()
    }

    fn take_pending_send_from(
        &mut self,
        comm: ContextId,
        dest: Rank,
        src: Rank,
        recv_tag: &Tag,
    ) -> Option<P2pOp> {
        let per_source = self.state.pending_sends.get_mut(&(comm, dest))?;
        let queue = per_source.get_mut(&src)?;
        let Tag::Value(t) = queue.front()?.tag else {
            unreachable!("a queued send never carries a wildcard tag")
        };
        if !recv_tag.matches_send(t) {
            return None;
        }
        let op = queue.pop_front();
        if queue.is_empty() {
            per_source.remove(&src);
        }
        op
    }

    /// Eligible sources for a wildcard receive: every source whose head
    /// send matches the receive's tag, in rank order for determinism.
    fn eligible_sources(&self, comm: ContextId, dest: Rank, recv_tag: &Tag) -> Vec<Rank> {
        let Some(per_source) = self.state.pending_sends.get(&(comm, dest)) else {
            return Vec::new();
        };
        let mut sources: Vec<Rank> = per_source
            .iter()
            .filter(|(_, q)| {
                q.front().is_some_and(|op| match op.tag {
                    Tag::Value(t) => recv_tag.matches_send(t),
                    Tag::Any => false,
                })
            })
            .map(|(src, _)| *src)
            .collect();
        sources.sort();
        sources
    }

    fn pick_wild_candidate(
        &mut self,
        comm: ContextId,
        dest: Rank,
        recv_tag: &Tag,
    ) -> Result<Option<P2pOp>> {
        let sources = self.eligible_sources(comm, dest, recv_tag);
        if sources.is_empty() {
            return Ok(None);
        }
        if sources.len() > 1 {
            self.state
                .explorers
                .entry((comm, dest))
                .or_default()
                .add_level(sources.len());
        }
        let chosen_index = self
            .state
            .explorers
            .get(&(comm, dest))
            .and_then(MatchExplorer::curr_alternative_index)
            .unwrap_or(0);
        let src = *sources.get(chosen_index).ok_or_else(|| CoreError::MatchingAmbiguity {
            comm: comm.0,
            detail: format!("explorer index {chosen_index} out of range for {} candidates", sources.len()),
        })?;
        Ok(self.take_pending_send_from(comm, dest, src, recv_tag))
    }

    /// Advances the wildcard explorer for `(comm, dest)` to the next untried
    /// source after a rollback. Returns `false` once every alternative at
    /// every level has been tried.
    pub fn advance_wild_alternative(&mut self, comm: ContextId, dest: Rank) -> bool {
        self.state
            .explorers
            .get_mut(&(comm, dest))
            .map(MatchExplorer::next_exploration)
            .unwrap_or(false)
    }

    pub fn pending_send_count(&self, comm: ContextId, dest: Rank) -> usize {
        self.state
            .pending_sends
            .get(&(comm, dest))
            .map_or(0, |m| m.values().map(VecDeque::len).sum())
    }

    /// Drains every unmatched send and waiting receive, for reporting as
    /// lost messages at finalize. Leaves the matcher empty.
    pub fn drain_unmatched(&mut self) -> (Vec<P2pOp>, Vec<P2pOp>) {
        let sends: Vec<P2pOp> = self
            .state
            .pending_sends
            .drain()
            .flat_map(|(_, per_source)| per_source.into_values().flatten())
            .collect();
        let recvs: Vec<P2pOp> = self
            .state
            .waiting_specific
            .drain()
            .flat_map(|(_, q)| q.into_iter())
            .chain(self.state.waiting_wild.drain().flat_map(|(_, q)| q.into_iter()))
            .collect();
        self.state.explorers.clear();
        (sends, recvs)
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

    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> CallSite {
        CallSite {
            pid: crate::types::ParallelId(0),
            lid: crate::types::LocationId(0),
        }
    }

    fn digest(size: usize) -> TypeDigest {
        TypeDigest {
            typemap: vec![(crate::types::BaseType::Byte, 0)],
            size,
        }
    }

    fn op(req: u64, rank: u32, peer: Peer, tag: Tag, comm: u64) -> P2pOp {
        P2pOp {
            req: ReqId(req),
            rank: Rank(rank),
            peer,
            tag,
            comm: ContextId(comm),
            type_digest: digest(8),
            site: site(),
        }
    }

    #[test]
    fn specific_send_then_recv_matches() {
        let mut m = P2pMatcher::new();
        let send = op(1, 0, Peer::Rank(Rank(1)), Tag::Value(7), 1);
        assert!(m.submit_send(send.clone()).unwrap().is_none());
        let recv = op(2, 1, Peer::Rank(Rank(0)), Tag::Value(7), 1);
        let matched = m.submit_recv(recv.clone()).unwrap().unwrap();
        assert_eq!(matched.send.req, send.req);
        assert_eq!(matched.recv.req, recv.req);
    }

    #[test]
    fn out_of_order_specific_recv_blocks_on_fifo_head() {
        let mut m = P2pMatcher::new();
        let send_a = op(1, 0, Peer::Rank(Rank(1)), Tag::Value(1), 1);
        let send_b = op(2, 0, Peer::Rank(Rank(1)), Tag::Value(2), 1);
        m.submit_send(send_a).unwrap();
        m.submit_send(send_b).unwrap();

        // A receive that only matches tag 2 cannot skip the tag-1 head.
        let recv = op(3, 1, Peer::Rank(Rank(0)), Tag::Value(2), 1);
        assert!(m.submit_recv(recv).unwrap().is_none());
        assert_eq!(m.pending_send_count(ContextId(1), Rank(1)), 2);
    }

    #[test]
    fn wildcard_recv_matches_oldest_pending_send() {
        let mut m = P2pMatcher::new();
        let from2 = op(1, 2, Peer::Rank(Rank(0)), Tag::Value(5), 1);
        m.submit_send(from2).unwrap();
        let recv = op(2, 0, Peer::Any, Tag::Any, 1);
        let matched = m.submit_recv(recv).unwrap().unwrap();
        assert_eq!(matched.send.rank, Rank(2));
    }

    #[test]
    fn ambiguous_wildcard_uses_explorer_and_advances_on_rollback() {
        let mut m = P2pMatcher::new();
        m.submit_send(op(1, 1, Peer::Rank(Rank(0)), Tag::Value(1), 1)).unwrap();
        m.submit_send(op(2, 2, Peer::Rank(Rank(0)), Tag::Value(1), 1)).unwrap();

        let recv = op(3, 0, Peer::Any, Tag::Any, 1);
        let first = m.submit_recv(recv).unwrap().unwrap();
        assert_eq!(first.send.rank, Rank(1));

        assert!(m.advance_wild_alternative(ContextId(1), Rank(0)));
    }

    #[test]
    fn type_mismatch_is_flagged_not_rejected() {
        let mut m = P2pMatcher::new();
        let mut send = op(1, 0, Peer::Rank(Rank(1)), Tag::Value(1), 1);
        send.type_digest = digest(16);
        m.submit_send(send.clone()).unwrap();
        let mut recv = op(2, 1, Peer::Rank(Rank(0)), Tag::Value(1), 1);
        recv.type_digest = digest(4);
        let matched = m.submit_recv(recv.clone()).unwrap().unwrap();
        assert!(matched.type_mismatch);
        assert_eq!(matched.send.req, send.req);
        assert_eq!(matched.recv.req, recv.req);
    }

    #[test]
    fn matching_type_digest_is_not_flagged() {
        let mut m = P2pMatcher::new();
        let send = op(1, 0, Peer::Rank(Rank(1)), Tag::Value(1), 1);
        m.submit_send(send).unwrap();
        let recv = op(2, 1, Peer::Rank(Rank(0)), Tag::Value(1), 1);
        let matched = m.submit_recv(recv).unwrap().unwrap();
        assert!(!matched.type_mismatch);
    }

    #[test]
    fn rollback_restores_pending_sends() {
        let mut m = P2pMatcher::new();
        m.submit_send(op(1, 0, Peer::Rank(Rank(1)), Tag::Value(1), 1)).unwrap();
        m.checkpoint();
        m.submit_send(op(2, 0, Peer::Rank(Rank(1)), Tag::Value(1), 1)).unwrap();
        assert_eq!(m.pending_send_count(ContextId(1), Rank(1)), 2);
        m.rollback().unwrap();
        assert_eq!(m.pending_send_count(ContextId(1), Rank(1)), 1);
    }
}
