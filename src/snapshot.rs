//! Quiescence detection (C10).
//!
//! Two complements work together: a per-node quiet timer that fires when
//! no record has crossed the tree for `quiet_timeout`, and a root-driven
//! two-phase byte-count probe that confirms every in-flight message has
//! actually been accounted for before the detector trusts the graph it
//! built. A probe is provisional until every expected node reports for its
//! epoch; any record observed while a probe is outstanding invalidates it,
//! since the snapshot it would confirm is already stale.
//!
//! Wall-clock instants are passed in by the caller rather than read here,
//! so the controller's quiescence logic stays deterministic and testable.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeReport {
    pub node_id: u32,
    pub epoch: u64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ProbeInFlight { epoch: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Every channel balanced on this epoch, but this is the first such
    /// epoch seen back to back; the caller must start another probe epoch
    /// to confirm before trusting the graph.
    Balanced { epoch: u64 },
    /// Every channel balanced on this epoch *and* on the one immediately
    /// before it: the probe succeeds.
    Achieved { epoch: u64 },
    /// All nodes reported but the tree still has messages in flight;
    /// caller should start a fresh probe at a later epoch. Resets the
    /// balanced streak.
    Unbalanced { epoch: u64 },
}

/// Root-side quiescence controller: one quiet timer plus the two-phase
/// byte-count probe. A single balanced epoch is only provisional — the
/// probe succeeds iff byte-counts balance tree-wide on two *successive*
/// polls, so the caller must re-probe once after a [`SnapshotOutcome::Balanced`]
/// before treating the snapshot as confirmed.
pub struct SnapshotController {
    quiet_timeout: Duration,
    last_activity: Instant,
    phase: Phase,
    expected_nodes: HashSet<u32>,
    reports: HashMap<u32, NodeReport>,
    balanced_streak: u32,
}

impl SnapshotController {
    pub fn new(quiet_timeout: Duration, expected_nodes: HashSet<u32>, now: Instant) -> Self {
        SnapshotController {
            quiet_timeout,
            last_activity: now,
            phase: Phase::Idle,
            expected_nodes,
            reports: HashMap::new(),
            balanced_streak: 0,
        }
    }

    /// Call on every record observed anywhere in the tree. Resets the
    /// quiet timer and, if a probe is outstanding, cancels it: the
    /// snapshot it would have confirmed is already invalid. Also resets
    /// the balanced streak, since activity means the prior balanced epoch
    /// no longer reflects a quiescent tree.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        if matches!(self.phase, Phase::ProbeInFlight { .. }) {
            self.phase = Phase::Idle;
            self.reports.clear();
        }
        self.balanced_streak = 0;
    }

    /// True once `quiet_timeout` has elapsed since the last observed record.
    pub fn is_quiet(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= self.quiet_timeout
    }

    /// Starts a new probe epoch. Only meaningful once [`Self::is_quiet`]
    /// holds; the caller enforces that ordering.
    pub fn begin_probe(&mut self, epoch: u64) {
        self.phase = Phase::ProbeInFlight { epoch };
        self.reports.clear();
    }

    pub fn is_probing(&self) -> bool {
        matches!(self.phase, Phase::ProbeInFlight { .. })
    }

    /// Folds in one node's byte counters for the current epoch. Reports
    /// for a stale epoch (the probe was cancelled and restarted) are
    /// dropped silently.
    pub fn submit_report(&mut self, report: NodeReport) -> Option<SnapshotOutcome> {
        let Phase::ProbeInFlight { epoch } = self.phase else {
            return None;
        };
        if report.epoch != epoch {
            return None;
        }
        self.reports.insert(report.node_id, report);

        if !self
            .expected_nodes
            .iter()
            .all(|id| self.reports.contains_key(id))
        {
            return None;
        }

        let total_sent: u64 = self.reports.values().map(|r| r.sent_bytes).sum();
        let total_received: u64 = self.reports.values().map(|r| r.received_bytes).sum();

        self.phase = Phase::Idle;
        self.reports.clear();

        if total_sent != total_received {
            self.balanced_streak = 0;
            return Some(SnapshotOutcome::Unbalanced { epoch });
        }

        self.balanced_streak += 1;
        if self.balanced_streak >= 2 {
            self.balanced_streak = 0;
            Some(SnapshotOutcome::Achieved { epoch })
        } else {
            Some(SnapshotOutcome::Balanced { epoch })
        }
    }
}
