//! Collective matching engine (C7).
//!
//! Each communicator advances through collective "waves" numbered from 0.
//! A wave completes once every participant of the communicator (its full
//! group for intra-comms, both groups for inter-comms) has contributed a
//! [`CollContribution`] for that wave number, and all contributions agree
//! on the collective id and, for variadic collectives, the count vector.
//! Disagreement is reported but does not stall the wave — the mismatching
//! rank is flagged and the wave still completes once everyone has checked in.

use crate::errors::{CoreError, Result};
use crate::types::{CallSite, CollId, CommSnapshot, ContextId, Rank};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollContribution {
    pub rank: Rank,
    pub comm: ContextId,
    pub coll: CollId,
    /// Per-rank send/recv counts for `v`-flavored collectives; empty for
    /// fixed-count collectives.
    pub counts: Vec<i64>,
    /// Reduction operator id, for collectives that carry one (Reduce,
    /// Allreduce, Scan, Exscan). `None` for collectives without one.
    pub op: Option<i32>,
    /// Distinguished root participant, for collectives where `coll.has_root()`
    /// is true. `None` for collectives without a root.
    pub root: Option<Rank>,
    pub site: CallSite,
}

/// Picks the root for a 2-rank inter-communicator bcast-family collective.
///
/// For inter-communicators whose local and remote groups are each a single
/// rank, the root is pinned to a fixed non-zero rank rather than derived
/// from which side issued the collective. That is wrong for the case where
/// the *local* rank is the one that should be root, but the behavior is
/// preserved verbatim rather than corrected (see DESIGN.md).
pub fn inter_comm_fixed_root(comm: &CommSnapshot) -> Option<Rank> {
    if !comm.is_inter {
        return None;
    }
    let remote = comm.remote_group.as_ref()?;
    if comm.local_group.len() == 1 && remote.len() == 1 {
        return Some(Rank(1));
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveComplete {
    pub comm: ContextId,
    pub wave: u32,
    pub coll: CollId,
    pub contributors: Vec<Rank>,
    /// Ranks whose contribution disagreed with the wave's majority shape.
    pub mismatched: Vec<Rank>,
}

#[derive(Debug, Clone, Default)]
struct WaveState {
    wave: u32,
    contributions: HashMap<Rank, CollContribution>,
}

#[derive(Debug, Clone, Default)]
struct State {
    waves: HashMap<ContextId, WaveState>,
}

#[derive(Debug, Default)]
pub struct CollMatcher {
    state: State,
    checkpoints: Vec<State>,
}

impl CollMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one rank's contribution to the communicator's current wave.
    /// Returns `Some(WaveComplete)` once every participant named by
    /// `comm_snapshot` has checked in; the wave counter then advances to
    /// the next wave.
    pub fn submit(
        &mut self,
        contribution: CollContribution,
        comm_snapshot: &CommSnapshot,
    ) -> Result<Option<WaveComplete>> {
        if !comm_snapshot.contains(contribution.rank) {
            return Err(CoreError::ParticipantMismatch {
                comm: contribution.comm.0,
                wave: self.current_wave(contribution.comm),
                detail: format!("{} is not a participant of this communicator", contribution.rank),
            });
        }

        let wave_state = self.state.waves.entry(contribution.comm).or_default();
        if wave_state.contributions.contains_key(&contribution.rank) {
            return Err(CoreError::ParticipantMismatch {
                comm: contribution.comm.0,
                wave: wave_state.wave,
                detail: format!("{} already contributed to wave {}", contribution.rank, wave_state.wave),
            });
        }
        wave_state.contributions.insert(contribution.rank, contribution);

        let participants = comm_snapshot.participants();
        if wave_state.contributions.len() < participants.len() {
            return Ok(None);
        }
        if !participants
            .iter()
            .all(|r| wave_state.contributions.contains_key(r))
        {
            return Ok(None);
        }

        Ok(Some(self.complete_wave(contribution.comm, &participants)))
    }

    fn complete_wave(&mut self, comm: ContextId, participants: &HashSet<Rank>) -> WaveComplete {
        let wave_state = self.state.waves.get_mut(&comm).expect("wave just populated");
        let wave = wave_state.wave;

        let mut contributors: Vec<Rank> = participants.iter().copied().collect();
        contributors.sort();

        let canonical = &wave_state.contributions[&contributors[0]];
        let canonical_coll = canonical.coll;
        let canonical_counts = canonical.counts.clone();
        let canonical_op = canonical.op;
        let canonical_root = canonical.root;

        let mismatched: Vec<Rank> = contributors
            .iter()
            .filter(|r| {
                let c = &wave_state.contributions[r];
                c.coll != canonical_coll
                    || (canonical_coll.is_variadic() && c.counts != canonical_counts)
                    || c.op != canonical_op
                    || (canonical_coll.has_root() && c.root != canonical_root)
            })
            .copied()
            .collect();

        wave_state.contributions.clear();
        wave_state.wave += 1;

        WaveComplete {
            comm,
            wave,
            coll: canonical_coll,
            contributors,
            mismatched,
        }
    }

    pub fn current_wave(&self, comm: ContextId) -> u32 {
        self.state.waves.get(&comm).map_or(0, |w| w.wave)
    }

    /// Entry point for non-blocking collective background propagation to
    /// report that a wave finished progressing outside of `submit`. The
    /// core only consumes the notification that a wave is complete; how a
    /// non-blocking collective advances itself to that point in the
    /// background is an external collaborator's concern, not this core's.
    pub fn notify_nbc_wave_complete(&mut self, rank: Rank, comm: ContextId, wave: u32) {
        tracing::debug!(%rank, comm = comm.0, wave, "nbc wave completion notified");
    }

    pub fn pending_contributors(&self, comm: ContextId) -> Vec<Rank> {
        self.state
            .waves
            .get(&comm)
            .map(|w| {
                let mut ranks: Vec<Rank> = w.contributions.keys().copied().collect();
                ranks.sort();
                ranks
            })
            .unwrap_or_default()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LocationId, ParallelId};

    fn site() -> CallSite {
        CallSite {
            pid: ParallelId(0),
            lid: LocationId(0),
        }
    }

    fn comm(ranks: &[u32]) -> CommSnapshot {
        CommSnapshot {
            id: ContextId(1),
            is_inter: false,
            local_group: ranks.iter().map(|r| Rank(*r)).collect(),
            remote_group: None,
            reachable_on_node: 0..0,
        }
    }

    fn contrib(rank: u32, coll: CollId, counts: Vec<i64>) -> CollContribution {
        contrib_with_op(rank, coll, counts, None)
    }

    fn contrib_with_op(rank: u32, coll: CollId, counts: Vec<i64>, op: Option<i32>) -> CollContribution {
        contrib_with_root(rank, coll, counts, op, None)
    }

    fn contrib_with_root(
        rank: u32,
        coll: CollId,
        counts: Vec<i64>,
        op: Option<i32>,
        root: Option<Rank>,
    ) -> CollContribution {
        CollContribution {
            rank: Rank(rank),
            comm: ContextId(1),
            coll,
            counts,
            op,
            root,
            site: site(),
        }
    }

    #[test]
    fn wave_completes_once_everyone_checks_in() {
        let mut m = CollMatcher::new();
        let c = comm(&[0, 1, 2]);
        assert!(m.submit(contrib(0, CollId::Barrier, vec![]), &c).unwrap().is_none());
        assert!(m.submit(contrib(1, CollId::Barrier, vec![]), &c).unwrap().is_none());
        let done = m.submit(contrib(2, CollId::Barrier, vec![]), &c).unwrap().unwrap();
        assert_eq!(done.wave, 0);
        assert_eq!(done.contributors, vec![Rank(0), Rank(1), Rank(2)]);
        assert!(done.mismatched.is_empty());
        assert_eq!(m.current_wave(ContextId(1)), 1);
    }

    #[test]
    fn mismatched_collective_id_is_flagged_not_blocked() {
        let mut m = CollMatcher::new();
        let c = comm(&[0, 1]);
        m.submit(contrib(0, CollId::Bcast, vec![]), &c).unwrap();
        let done = m.submit(contrib(1, CollId::Barrier, vec![]), &c).unwrap().unwrap();
        assert_eq!(done.mismatched, vec![Rank(1)]);
    }

    #[test]
    fn variadic_count_mismatch_is_flagged() {
        let mut m = CollMatcher::new();
        let c = comm(&[0, 1]);
        m.submit(contrib(0, CollId::Alltoallv, vec![1, 2]), &c).unwrap();
        let done = m
            .submit(contrib(1, CollId::Alltoallv, vec![9, 9]), &c)
            .unwrap()
            .unwrap();
        assert_eq!(done.mismatched, vec![Rank(1)]);
    }

    #[test]
    fn operator_mismatch_on_reduce_is_flagged() {
        let mut m = CollMatcher::new();
        let c = comm(&[0, 1]);
        m.submit(contrib_with_op(0, CollId::Reduce, vec![], Some(1)), &c).unwrap();
        let done = m
            .submit(contrib_with_op(1, CollId::Reduce, vec![], Some(2)), &c)
            .unwrap()
            .unwrap();
        assert_eq!(done.mismatched, vec![Rank(1)]);
    }

    #[test]
    fn root_mismatch_on_bcast_is_flagged() {
        let mut m = CollMatcher::new();
        let c = comm(&[0, 1, 2]);
        m.submit(contrib_with_root(0, CollId::Bcast, vec![], None, Some(Rank(0))), &c)
            .unwrap();
        m.submit(contrib_with_root(1, CollId::Bcast, vec![], None, Some(Rank(0))), &c)
            .unwrap();
        let done = m
            .submit(contrib_with_root(2, CollId::Bcast, vec![], None, Some(Rank(1))), &c)
            .unwrap()
            .unwrap();
        assert_eq!(done.mismatched, vec![Rank(2)]);
    }

    #[test]
    fn root_disagreement_is_ignored_for_rootless_collectives() {
        let mut m = CollMatcher::new();
        let c = comm(&[0, 1]);
        m.submit(contrib_with_root(0, CollId::Barrier, vec![], None, Some(Rank(0))), &c)
            .unwrap();
        let done = m
            .submit(contrib_with_root(1, CollId::Barrier, vec![], None, Some(Rank(1))), &c)
            .unwrap()
            .unwrap();
        assert!(done.mismatched.is_empty());
    }

    #[test]
    fn inter_comm_fixed_root_pins_non_zero_rank_for_two_rank_peer_groups() {
        let two_rank_inter = CommSnapshot {
            id: ContextId(9),
            is_inter: true,
            local_group: vec![Rank(0)],
            remote_group: Some(vec![Rank(0)]),
            reachable_on_node: 0..0,
        };
        assert_eq!(inter_comm_fixed_root(&two_rank_inter), Some(Rank(1)));

        let intra = comm(&[0, 1]);
        assert_eq!(inter_comm_fixed_root(&intra), None);
    }

    #[test]
    fn non_participant_is_rejected() {
        let mut m = CollMatcher::new();
        let c = comm(&[0, 1]);
        assert!(matches!(
            m.submit(contrib(5, CollId::Barrier, vec![]), &c),
            Err(CoreError::ParticipantMismatch { .. })
        ));
    }

    #[test]
    fn double_contribution_same_wave_is_rejected() {
        let mut m = CollMatcher::new();
        let c = comm(&[0, 1]);
        m.submit(contrib(0, CollId::Barrier, vec![]), &c).unwrap();
        assert!(matches!(
            m.submit(contrib(0, CollId::Barrier, vec![]), &c),
            Err(CoreError::ParticipantMismatch { .. })
        ));
    }
}
