//! Outbound diagnostic events (A2).
//!
//! Every diagnostic is both logged through `tracing` at its severity and
//! handed to whatever [`DiagnosticSink`]s the host process registered —
//! the CLI harness in [`crate::main`] wires a report writer in; embedding
//! callers can register their own. [`RankSet::Strided`] lets a component
//! report "this happened identically on ranks 4, 8, 12, ..." as one event
//! instead of one per rank, which matters once a run has thousands of ranks.

use crate::errors::Severity;
use crate::types::{CallSite, Rank};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Deadlock,
    LostMessage,
    TypeMismatch,
    ParticipantMismatch,
    Generic(String),
}

impl DiagnosticKind {
    fn label(&self) -> &str {
        match self {
            DiagnosticKind::Deadlock => "deadlock",
            DiagnosticKind::LostMessage => "lost_message",
            DiagnosticKind::TypeMismatch => "type_mismatch",
            DiagnosticKind::ParticipantMismatch => "participant_mismatch",
            DiagnosticKind::Generic(label) => label,
        }
    }
}

/// The set of ranks a diagnostic applies to, with a compact form for
/// regular patterns so reporting one systemic issue doesn't cost one
/// event per affected rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankSet {
    Explicit(Vec<Rank>),
    /// `count` ranks starting at `start`, `stride` apart.
    Strided { start: u32, stride: u32, count: u32 },
}

impl RankSet {
    pub fn to_vec(&self) -> Vec<Rank> {
        match self {
            RankSet::Explicit(ranks) => ranks.clone(),
            RankSet::Strided { start, stride, count } => {
                (0..*count).map(|i| Rank(start + i * stride)).collect()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RankSet::Explicit(ranks) => ranks.len(),
            RankSet::Strided { count, .. } => *count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub ranks: RankSet,
    pub message: String,
    pub site: Option<CallSite>,
}

/// Receives every diagnostic in addition to the `tracing` log line. A
/// report writer (HTML/DOT/reproducer) or an embedding application's
/// callback both implement this.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: &DiagnosticEvent);
}

/// Fan-out to zero or more [`DiagnosticSink`]s, always paired with a
/// `tracing` event regardless of how many sinks are registered.
#[derive(Default)]
pub struct DiagnosticBus {
    sinks: Vec<Box<dyn DiagnosticSink>>,
}

impl DiagnosticBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Box<dyn DiagnosticSink>) {
        self.sinks.push(sink);
    }

    pub fn publish(&self, event: DiagnosticEvent) {
        match event.severity {
            Severity::Error => error!(
                kind = event.kind.label(),
                ranks = event.ranks.len(),
                message = %event.message,
                "diagnostic"
            ),
            Severity::Warning => warn!(
                kind = event.kind.label(),
                ranks = event.ranks.len(),
                message = %event.message,
                "diagnostic"
            ),
            Severity::Info => info!(
                kind = event.kind.label(),
                ranks = event.ranks.len(),
                message = %event.message,
                "diagnostic"
            ),
        }
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn strided_rank_set_expands_correctly() {
        let set = RankSet::Strided { start: 4, stride: 4, count: 3 };
        assert_eq!(set.to_vec(), vec![Rank(4), Rank(8), Rank(12)]);
    }

    struct CollectingSink {
        events: std::sync::Arc<Mutex<Vec<DiagnosticEvent>>>,
    }

    impl DiagnosticSink for CollectingSink {
        fn emit(&self, event: &DiagnosticEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn bus_fans_out_to_every_registered_sink() {
        let mut bus = DiagnosticBus::new();
        let collected = std::sync::Arc::new(Mutex::new(Vec::new()));
        bus.register(Box::new(CollectingSink { events: collected.clone() }));

        bus.publish(DiagnosticEvent {
            severity: Severity::Warning,
            kind: DiagnosticKind::TypeMismatch,
            ranks: RankSet::Explicit(vec![Rank(0)]),
            message: "size mismatch".to_string(),
            site: None,
        });

        let events = collected.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DiagnosticKind::TypeMismatch);
    }
}
