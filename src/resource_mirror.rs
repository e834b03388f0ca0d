//! Read-only mirror of communicator and datatype handles (C4).
//!
//! The application-facing layers (out of scope here) resolve handles to
//! snapshots once and publish them here; every matching component reads
//! through `Arc` rather than re-deriving structure from wire handles.
//! [`ContextIdGenerator`] derives child communicator ids locally, without
//! any cross-rank coordination — see the overflow policy on
//! [`ContextIdGenerator::next_child`].

use crate::types::{CommSnapshot, ContextId, Rank, TypeSnapshot};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Opaque handle identifying a registered datatype snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u64);

/// Generates child communicator context ids from a parent id without
/// coordinating with other ranks, mirroring the original splitter's
/// `contextid_multiplier` branching scheme.
pub struct ContextIdGenerator {
    multiplier: u64,
    counters: DashMap<ContextId, AtomicU64>,
}

impl ContextIdGenerator {
    pub fn new(multiplier: u32) -> Self {
        ContextIdGenerator {
            multiplier: multiplier.max(1) as u64,
            counters: DashMap::new(),
        }
    }

    /// Derives the next child id under `parent`. Context ids can in
    /// principle be exhausted by a long chain of communicator splits; this
    /// saturates at `u64::MAX` and logs a warning rather than silently
    /// wrapping into an id that could collide with an unrelated
    /// communicator.
    pub fn next_child(&self, parent: ContextId) -> ContextId {
        let counter = self
            .counters
            .entry(parent)
            .or_insert_with(|| AtomicU64::new(0));
        let seed = counter.fetch_add(1, Ordering::Relaxed);

        let derived = parent
            .0
            .checked_mul(self.multiplier)
            .and_then(|base| base.checked_add(seed));

        match derived {
            Some(id) => ContextId(id),
            None => {
                warn!(parent = parent.0, "context id space exhausted under this parent, saturating");
                ContextId(u64::MAX)
            }
        }
    }
}

/// Read-only, concurrently-accessible snapshot store.
#[derive(Default)]
pub struct ResourceMirror {
    comms: DashMap<ContextId, Arc<CommSnapshot>>,
    types: DashMap<TypeId, Arc<TypeSnapshot>>,
}

impl ResourceMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_comm(&self, snapshot: CommSnapshot) -> Arc<CommSnapshot> {
        let shared = Arc::new(snapshot);
        self.comms.insert(shared.id, Arc::clone(&shared));
        shared
    }

    pub fn lookup_comm(&self, id: ContextId) -> Option<Arc<CommSnapshot>> {
        self.comms.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn register_type(&self, id: TypeId, snapshot: TypeSnapshot) -> Arc<TypeSnapshot> {
        let shared = Arc::new(snapshot);
        self.types.insert(id, Arc::clone(&shared));
        shared
    }

    pub fn lookup_type(&self, id: TypeId) -> Option<Arc<TypeSnapshot>> {
        self.types.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Resolves a communicator-local rank index to its world rank.
    pub fn translate_local_rank(&self, comm: ContextId, local_rank: u32) -> Option<Rank> {
        let snapshot = self.lookup_comm(comm)?;
        snapshot.local_group.get(local_rank as usize).copied()
    }

    pub fn is_rank_in_comm(&self, comm: ContextId, rank: Rank) -> bool {
        self.lookup_comm(comm).is_some_and(|s| s.contains(rank))
    }

    pub fn comm_count(&self) -> usize {
        self.comms.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BaseType;

    fn comm(id: u64, ranks: &[u32]) -> CommSnapshot {
        CommSnapshot {
            id: ContextId(id),
            is_inter: false,
            local_group: ranks.iter().map(|r| Rank(*r)).collect(),
            remote_group: None,
            reachable_on_node: 0..0,
        }
    }

    #[test]
    fn register_and_lookup_comm_round_trips() {
        let mirror = ResourceMirror::new();
        mirror.register_comm(comm(1, &[0, 1, 2]));
        let snapshot = mirror.lookup_comm(ContextId(1)).unwrap();
        assert_eq!(snapshot.local_group.len(), 3);
    }

    #[test]
    fn translate_local_rank_indexes_into_group() {
        let mirror = ResourceMirror::new();
        mirror.register_comm(comm(1, &[5, 6, 7]));
        assert_eq!(mirror.translate_local_rank(ContextId(1), 1), Some(Rank(6)));
        assert_eq!(mirror.translate_local_rank(ContextId(1), 9), None);
    }

    #[test]
    fn type_registration_round_trips() {
        let mirror = ResourceMirror::new();
        let id = TypeId(42);
        mirror.register_type(id, TypeSnapshot::predefined(BaseType::Int32, 4, 4));
        assert_eq!(mirror.lookup_type(id).unwrap().size, 4);
        assert!(mirror.lookup_type(TypeId(99)).is_none());
    }

    #[test]
    fn context_id_generator_is_deterministic_per_parent() {
        let gen = ContextIdGenerator::new(128);
        let a = gen.next_child(ContextId(1));
        let b = gen.next_child(ContextId(1));
        assert_ne!(a, b);
        assert_eq!(a, ContextId(128));
        assert_eq!(b, ContextId(129));
    }

    #[test]
    fn context_id_generator_saturates_on_overflow() {
        let gen = ContextIdGenerator::new(128);
        let near_max = ContextId(u64::MAX);
        assert_eq!(gen.next_child(near_max), ContextId(u64::MAX));
    }
}
