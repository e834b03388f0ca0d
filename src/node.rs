//! Node orchestrator wiring C1–C11 and the ambient components together.
//!
//! One [`ToolNode`] is the single piece of state a TBON node's scheduler
//! task owns. It does not run the task loop itself — that lives in
//! [`crate::main`] as a `tokio::select!` over a [`crate::strategy::Strategy`]
//! and whatever local event sources feed it — but every operation the
//! loop performs funnels through here, so the matching engines, the
//! blocking-state tracker, and the wait-for-graph stay consistent with
//! each other and with the reordering queue's checkpoint group.

use crate::blocking_state::{BlockingOp, BlockingStateTracker, WfgShard};
use crate::coll_match::{CollContribution, CollMatcher, WaveComplete};
use crate::config::Config;
use crate::diagnostics::{DiagnosticBus, DiagnosticEvent, DiagnosticKind, RankSet};
use crate::errors::{CoreError, Result, Severity};
use crate::finalize::{self, FinalizeTracker, LostMessage};
use crate::p2p_match::{MatchedPair, P2pMatcher, P2pOp};
use crate::reordering::ReorderingQueue;
use crate::resource_mirror::ResourceMirror;
use crate::snapshot::SnapshotController;
use crate::types::{CommSnapshot, Rank};
use crate::wfg::{DeadlockReport, Wfg};
use std::collections::HashSet;
use std::time::Instant;

/// One rank's next deferred operation, as handed to the reordering queue.
#[derive(Debug, Clone)]
pub enum Event {
    P2pSend(P2pOp),
    P2pRecv(P2pOp),
    CollContribute(CollContribution),
    BeginBlocking(BlockingOp),
    EndBlocking,
}

/// Outcome of processing one [`Event`], surfaced to the scheduler loop so
/// it can decide whether to re-check for a deadlock or forward a wave
/// completion onward.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    P2pMatched(MatchedPair),
    P2pQueued,
    WaveComplete(WaveComplete),
    WaveQueued,
    Blocked(WfgShard),
    Unblocked,
}

pub struct ToolNode {
    config: Config,
    mirror: ResourceMirror,
    reordering: ReorderingQueue<Event>,
    p2p: P2pMatcher,
    coll: CollMatcher,
    blocking: BlockingStateTracker,
    finalize: FinalizeTracker,
    snapshot: SnapshotController,
    diagnostics: DiagnosticBus,
}

impl ToolNode {
    pub fn new(config: Config, expected_children: HashSet<u32>, now: Instant) -> Self {
        let quiet_timeout = config.quiet_timeout();
        ToolNode {
            config,
            mirror: ResourceMirror::new(),
            reordering: ReorderingQueue::new(),
            p2p: P2pMatcher::new(),
            coll: CollMatcher::new(),
            blocking: BlockingStateTracker::new(),
            finalize: FinalizeTracker::new(expected_children.clone()),
            snapshot: SnapshotController::new(quiet_timeout, expected_children, now),
            diagnostics: DiagnosticBus::new(),
        }
    }

    pub fn resource_mirror(&self) -> &ResourceMirror {
        &self.mirror
    }

    pub fn diagnostics_mut(&mut self) -> &mut DiagnosticBus {
        &mut self.diagnostics
    }

    pub fn finalize_tracker_mut(&mut self) -> &mut FinalizeTracker {
        &mut self.finalize
    }

    pub fn snapshot_controller_mut(&mut self) -> &mut SnapshotController {
        &mut self.snapshot
    }

    /// Submits one rank's next event. Enqueues it behind anything already
    /// pending for that rank, and processes it immediately if it reaches
    /// the head of an open, unsuspended queue. Any event submission counts
    /// as tree activity for the quiescence probe.
    pub fn submit(&mut self, rank: Rank, event: Event, now: Instant) -> Result<Option<EventOutcome>> {
        self.snapshot.record_activity(now);
        if self.reordering.enqueue(rank, event) {
            let head = self
                .reordering
                .pop_ready(rank)
                .expect("enqueue just reported this rank's queue is ready");
            return self.process(rank, head).map(Some);
        }
        Ok(None)
    }

    /// Drains and processes every currently-ready event for `rank`, e.g.
    /// after a rollback reopens it. Returns every outcome produced, in order.
    pub fn drain_ready(&mut self, rank: Rank) -> Result<Vec<EventOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(event) = self.reordering.pop_ready(rank) {
            outcomes.push(self.process(rank, event)?);
        }
        Ok(outcomes)
    }

    fn process(&mut self, rank: Rank, event: Event) -> Result<EventOutcome> {
        match event {
            Event::P2pSend(op) => match self.p2p.submit_send(op)? {
                Some(pair) => {
                    self.blocking.end_blocking(pair.recv.rank);
                    self.publish_type_mismatch(&pair);
                    Ok(EventOutcome::P2pMatched(pair))
                }
                None => Ok(EventOutcome::P2pQueued),
            },
            Event::P2pRecv(op) => match self.p2p.submit_recv(op)? {
                Some(pair) => {
                    self.blocking.end_blocking(pair.recv.rank);
                    self.publish_type_mismatch(&pair);
                    Ok(EventOutcome::P2pMatched(pair))
                }
                None => Ok(EventOutcome::P2pQueued),
            },
            Event::CollContribute(contribution) => {
                let comm = self
                    .mirror
                    .lookup_comm(contribution.comm)
                    .ok_or(CoreError::UnknownComm(contribution.comm.0))?;
                match self.coll.submit(contribution, &comm)? {
                    Some(wave) => {
                        for rank in &wave.contributors {
                            self.blocking.end_blocking(*rank);
                        }
                        if !wave.mismatched.is_empty() {
                            self.diagnostics.publish(DiagnosticEvent {
                                severity: Severity::Warning,
                                kind: DiagnosticKind::ParticipantMismatch,
                                ranks: RankSet::Explicit(wave.mismatched.clone()),
                                message: format!("collective parameters disagreed on wave {}", wave.wave),
                                site: None,
                            });
                        }
                        Ok(EventOutcome::WaveComplete(wave))
                    }
                    None => Ok(EventOutcome::WaveQueued),
                }
            }
            Event::BeginBlocking(op) => {
                self.reordering.block_rank(rank);
                let shard = self.blocking.begin_blocking(rank, op);
                Ok(EventOutcome::Blocked(shard))
            }
            Event::EndBlocking => {
                self.blocking.end_blocking(rank);
                self.reordering.resume_rank(rank);
                Ok(EventOutcome::Unblocked)
            }
        }
    }

    /// A matched pair whose typemaps don't fit is still a match — it is
    /// diagnosed here the same way a collective parameter mismatch is
    /// diagnosed in `process`, without blocking or dropping the operation.
    fn publish_type_mismatch(&mut self, pair: &MatchedPair) {
        if !pair.type_mismatch {
            return;
        }
        self.diagnostics.publish(DiagnosticEvent {
            severity: Severity::Error,
            kind: DiagnosticKind::TypeMismatch,
            ranks: RankSet::Explicit(vec![pair.send.rank, pair.recv.rank]),
            message: format!(
                "send from {} ({} bytes) does not fit receive on {} ({} bytes)",
                pair.send.rank, pair.send.type_digest.size, pair.recv.rank, pair.recv.type_digest.size
            ),
            site: Some(pair.recv.site),
        });
    }

    /// Assembles the current wait-for-graph from every blocked rank and
    /// runs fixpoint cycle detection (C9).
    pub fn check_deadlock(&self) -> DeadlockReport {
        Wfg::from_shards(self.blocking.all_shards()).detect()
    }

    /// Checkpoints the reordering queue, both matchers and the blocking
    /// tracker as one atomic group.
    pub fn checkpoint(&mut self) {
        self.reordering.checkpoint();
        self.p2p.checkpoint();
        self.coll.checkpoint();
        self.blocking.checkpoint();
    }

    /// Rolls back the entire checkpoint group. A depth mismatch between
    /// members (which should never happen if `checkpoint`/`rollback` are
    /// always called together) surfaces as a fatal
    /// [`CoreError::CheckpointGroupMismatch`] rather than silently
    /// leaving the group half-restored.
    pub fn rollback(&mut self) -> Result<()> {
        let depths = (
            self.reordering.checkpoint_depth(),
            self.p2p.checkpoint_depth(),
        );
        if depths.0 != depths.1 {
            return Err(CoreError::CheckpointGroupMismatch(format!(
                "reordering depth {} != p2p depth {}",
                depths.0, depths.1
            )));
        }
        self.blocking.rollback()?;
        self.coll.rollback()?;
        self.p2p.rollback()?;
        self.reordering.rollback()?;
        Ok(())
    }

    /// Runs the finalize-time drain: any unmatched point-to-point
    /// operation is reported as lost, gated by configuration.
    pub fn finalize_drain(&mut self) -> Vec<LostMessage> {
        if !self.config.report_lost_messages {
            self.p2p.drain_unmatched();
            return Vec::new();
        }
        let lost = finalize::drain_lost_messages(&mut self.p2p);
        if !lost.is_empty() {
            self.diagnostics.publish(DiagnosticEvent {
                severity: Severity::Warning,
                kind: DiagnosticKind::LostMessage,
                ranks: RankSet::Explicit(lost.iter().map(|l| l.op.rank).collect()),
                message: format!("{} point-to-point operation(s) never matched", lost.len()),
                site: None,
            });
        }
        lost
    }

    pub fn register_comm(&self, snapshot: CommSnapshot) {
        self.mirror.register_comm(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallSite, ContextId, LocationId, ParallelId, Peer, ReqId, Tag, TypeDigest};

    fn site() -> CallSite {
        CallSite { pid: ParallelId(0), lid: LocationId(0) }
    }

    fn digest() -> TypeDigest {
        TypeDigest { typemap: vec![], size: 8 }
    }

    fn p2p_op(req: u64, rank: u32, peer: Peer, tag: Tag) -> P2pOp {
        P2pOp { req: ReqId(req), rank: Rank(rank), peer, tag, comm: ContextId(1), type_digest: digest(), site: site() }
    }

    #[test]
    fn send_then_recv_matches_through_the_node() {
        let mut node = ToolNode::new(Config::default(), HashSet::new(), Instant::now());
        let send = p2p_op(1, 0, Peer::Rank(Rank(1)), Tag::Value(1));
        assert!(matches!(
            node.submit(Rank(0), Event::P2pSend(send), Instant::now()).unwrap(),
            Some(EventOutcome::P2pQueued)
        ));

        let recv = p2p_op(2, 1, Peer::Rank(Rank(0)), Tag::Value(1));
        let outcome = node.submit(Rank(1), Event::P2pRecv(recv), Instant::now()).unwrap().unwrap();
        assert!(matches!(outcome, EventOutcome::P2pMatched(_)));
    }

    #[test]
    fn type_mismatch_completes_the_match_and_publishes_a_diagnostic() {
        use crate::diagnostics::DiagnosticSink;
        use std::sync::{Arc, Mutex};

        struct CollectingSink {
            events: Arc<Mutex<Vec<DiagnosticEvent>>>,
        }
        impl DiagnosticSink for CollectingSink {
            fn emit(&self, event: &DiagnosticEvent) {
                self.events.lock().unwrap().push(event.clone());
            }
        }

        let mut node = ToolNode::new(Config::default(), HashSet::new(), Instant::now());
        let collected = Arc::new(Mutex::new(Vec::new()));
        node.diagnostics_mut().register(Box::new(CollectingSink { events: collected.clone() }));

        let mut send = p2p_op(1, 0, Peer::Rank(Rank(1)), Tag::Value(1));
        send.type_digest = TypeDigest { typemap: vec![], size: 16 };
        node.submit(Rank(0), Event::P2pSend(send), Instant::now()).unwrap();

        let mut recv = p2p_op(2, 1, Peer::Rank(Rank(0)), Tag::Value(1));
        recv.type_digest = TypeDigest { typemap: vec![], size: 4 };
        let outcome = node.submit(Rank(1), Event::P2pRecv(recv), Instant::now()).unwrap().unwrap();
        assert!(matches!(outcome, EventOutcome::P2pMatched(ref pair) if pair.type_mismatch));

        let events = collected.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn blocking_then_unblocking_clears_the_wfg() {
        let mut node = ToolNode::new(Config::default(), HashSet::new(), Instant::now());
        node.submit(
            Rank(0),
            Event::BeginBlocking(BlockingOp::P2P { req: ReqId(1), candidates: vec![Rank(1)] }),
            Instant::now(),
        )
        .unwrap();
        assert!(!node.check_deadlock().is_deadlocked()); // rank 1 isn't itself blocked

        node.submit(Rank(0), Event::EndBlocking, Instant::now()).unwrap();
        assert_eq!(node.check_deadlock().core.len(), 0);
    }

    #[test]
    fn rollback_restores_matcher_and_queue_state() {
        let mut node = ToolNode::new(Config::default(), HashSet::new(), Instant::now());
        node.submit(Rank(0), Event::P2pSend(p2p_op(1, 0, Peer::Rank(Rank(1)), Tag::Value(1))), Instant::now())
            .unwrap();
        node.checkpoint();
        node.submit(Rank(0), Event::P2pSend(p2p_op(2, 0, Peer::Rank(Rank(1)), Tag::Value(2))), Instant::now())
            .unwrap();
        node.rollback().unwrap();

        let recv = p2p_op(3, 1, Peer::Rank(Rank(0)), Tag::Value(2));
        let outcome = node.submit(Rank(1), Event::P2pRecv(recv), Instant::now()).unwrap();
        // tag 2 send should have been rolled back away; only tag 1 remains pending
        assert!(matches!(outcome, Some(EventOutcome::P2pQueued)));
    }
}
