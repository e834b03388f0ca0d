//! Core data model shared by every matching and graph component.
//!
//! Types here are intentionally dumb: no component-specific behavior lives
//! on them beyond small predicates. The matching logic that interprets them
//! lives in [`crate::p2p_match`], [`crate::coll_match`], [`crate::blocking_state`]
//! and [`crate::wfg`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;

/// A non-negative integer identifying one application process in the
/// global (world) communicator. All matching is expressed in these
/// world ranks; handle-local ranks are translated via the resource mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rank(pub u32);

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank{}", self.0)
    }
}

/// Wildcard source marker, mirrors `MPI_ANY_SOURCE`.
pub const ANY_SOURCE: i64 = -1;
/// Wildcard tag marker, mirrors `MPI_ANY_TAG`.
pub const ANY_TAG: i32 = -1;
/// Marker rank for a no-op peer, mirrors `MPI_PROC_NULL`.
pub const PROC_NULL: i64 = -2;

/// A peer specification for a point-to-point op: either a concrete world
/// rank or the `ANY_SOURCE` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Peer {
    Rank(Rank),
    Any,
    ProcNull,
}

impl Peer {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            ANY_SOURCE => Peer::Any,
            PROC_NULL => Peer::ProcNull,
            r if r >= 0 => Peer::Rank(Rank(r as u32)),
            other => panic!("invalid peer rank encoding: {other}"),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Peer::Any)
    }

    pub fn rank(&self) -> Option<Rank> {
        match self {
            Peer::Rank(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Rank(r) => write!(f, "{r}"),
            Peer::Any => write!(f, "ANY_SOURCE"),
            Peer::ProcNull => write!(f, "PROC_NULL"),
        }
    }
}

/// A tag specification: either a concrete tag or the `ANY_TAG` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Value(i32),
    Any,
}

impl Tag {
    pub fn from_raw(raw: i32) -> Self {
        if raw == ANY_TAG {
            Tag::Any
        } else {
            Tag::Value(raw)
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Tag::Any)
    }

    /// Tag cross-check per the matching rule: `recv.tag == ANY_TAG || send.tag == recv.tag`.
    pub fn matches_send(&self, send_tag: i32) -> bool {
        match self {
            Tag::Any => true,
            Tag::Value(t) => *t == send_tag,
        }
    }
}

/// Call site identifying the source location of an event, forwarded
/// opaquely from the (out-of-scope) callpath resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    pub pid: ParallelId,
    pub lid: LocationId,
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.lid.0, self.pid.0)
    }
}

/// Parallel id: identifies the calling process/thread context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParallelId(pub u64);

/// Location id: identifies a specific call site within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationId(pub u64);

/// 64-bit communicator context id. Derived without inter-process
/// coordination using a monotonically advancing per-parent seed
/// (see [`crate::resource_mirror::ContextIdGenerator`]); id-space exhaustion
/// under one parent is handled by saturating rather than wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Immutable communicator snapshot, published once and shared by `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommSnapshot {
    pub id: ContextId,
    pub is_inter: bool,
    pub local_group: Vec<Rank>,
    pub remote_group: Option<Vec<Rank>>,
    pub reachable_on_node: Range<u32>,
}

impl CommSnapshot {
    /// Equality of two communicators is equality of context ids together
    /// with equal group membership.
    pub fn same_communicator(&self, other: &CommSnapshot) -> bool {
        self.id == other.id
            && self.local_group == other.local_group
            && self.remote_group == other.remote_group
    }

    pub fn contains(&self, rank: Rank) -> bool {
        self.local_group.contains(&rank)
            || self
                .remote_group
                .as_ref()
                .is_some_and(|g| g.contains(&rank))
    }

    /// All ranks that must contribute a wave for a collective on this comm:
    /// local group, plus remote group for inter-communicators.
    pub fn participants(&self) -> HashSet<Rank> {
        let mut set: HashSet<Rank> = self.local_group.iter().copied().collect();
        if let Some(remote) = &self.remote_group {
            set.extend(remote.iter().copied());
        }
        set
    }
}

/// Recursive, immutable datatype snapshot. Used only for typematching
/// cross-checks at match time, never for matching itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSnapshot {
    pub constructor: TypeConstructor,
    pub typemap: Vec<(BaseType, usize)>,
    pub extent: usize,
    pub true_extent: usize,
    pub size: usize,
    pub alignment: usize,
}

impl TypeSnapshot {
    pub fn predefined(base: BaseType, size: usize, alignment: usize) -> Self {
        TypeSnapshot {
            constructor: TypeConstructor::Predefined(base),
            typemap: vec![(base, 0)],
            extent: size,
            true_extent: size,
            size,
            alignment,
        }
    }

    /// Digest used for cross-checking two typemaps without comparing the
    /// full (possibly deeply nested) structure.
    pub fn digest(&self) -> TypeDigest {
        TypeDigest {
            typemap: self.typemap.clone(),
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDigest {
    pub typemap: Vec<(BaseType, usize)>,
    pub size: usize,
}

impl TypeDigest {
    /// Short-send into long-receive is allowed: `size(sender) <= size(receiver)`.
    pub fn send_fits_receive(&self, receiver: &TypeDigest) -> bool {
        self.size <= receiver.size
    }

    pub fn structurally_equal(&self, other: &TypeDigest) -> bool {
        self.typemap == other.typemap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseType {
    Byte,
    Char,
    Int32,
    Int64,
    Float32,
    Float64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeConstructor {
    Predefined(BaseType),
    Contiguous(Box<TypeSnapshot>),
    Vector(Box<TypeSnapshot>),
    Hvector(Box<TypeSnapshot>),
    Indexed(Box<TypeSnapshot>),
    Hindexed(Box<TypeSnapshot>),
    Struct(Vec<TypeSnapshot>),
    IndexedBlock(Box<TypeSnapshot>),
    Resized(Box<TypeSnapshot>),
    Subarray(Box<TypeSnapshot>),
    Darray(Box<TypeSnapshot>),
}

/// Buffer address sentinels. Kept as an enum rather than numeric markers
/// since this core never does address arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferRef {
    Addr(u64),
    Bottom,
    InPlace,
}

/// Send mode, mirrors the four MPI send variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendMode {
    Standard,
    Buffered,
    Synchronous,
    Ready,
}

/// Opaque request identifier, unique within the issuing rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReqId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    P2P,
    Coll,
    Io,
    Rma,
    Generalized,
}

/// Snapshot of a request's state, forwarded by the (out-of-scope)
/// request tracker as a read-only oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub id: ReqId,
    pub kind: RequestKind,
    pub is_send: bool,
    pub is_persistent: bool,
    pub is_active: bool,
    pub is_canceled: bool,
    pub is_proc_null: bool,
    pub comm: ContextId,
    pub tag: Tag,
    pub peer: Peer,
}

/// Enumeration of collective operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollId {
    Barrier,
    Bcast,
    Reduce,
    Allreduce,
    Scatter,
    Scatterv,
    Gather,
    Gatherv,
    Allgather,
    Allgatherv,
    Alltoall,
    Alltoallv,
    ReduceScatter,
    Scan,
    Exscan,
}

impl CollId {
    /// True if this collective carries a distinguished root participant.
    pub fn has_root(&self) -> bool {
        matches!(
            self,
            CollId::Bcast
                | CollId::Reduce
                | CollId::Scatter
                | CollId::Scatterv
                | CollId::Gather
                | CollId::Gatherv
        )
    }

    /// True if this is a `v`-flavored (variadic count) collective.
    pub fn is_variadic(&self) -> bool {
        matches!(
            self,
            CollId::Scatterv | CollId::Gatherv | CollId::Allgatherv | CollId::Alltoallv
        )
    }
}

impl fmt::Display for CollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
