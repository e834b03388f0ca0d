//! Communication transport abstraction (C1).
//!
//! One TBON edge is a bounded channel with backpressure; an in-process
//! [`mpsc_transport::MpscTransport`] backs the seed-scenario tests, a
//! socket-based [`tcp_transport::TcpTransport`] backs real deployments.
//! Both sides of an edge exchange framed [`Record`]s — the C2 strategy
//! layer interprets their payload, this layer only moves bytes reliably
//! and in order.

pub mod mpsc_transport;
pub mod tcp_transport;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifies one edge of the TBON from this node's perspective: a child
/// index for down/intra edges, or a sentinel for the edge to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelId {
    Parent,
    Child(u32),
}

/// Direction a record travels relative to this node, mirrors the
/// up/down/intra framing of the original protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Intra,
}

/// One framed unit of communication. The `payload` is an opaque,
/// already-serialized [`crate::strategy`] record; this layer never
/// inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub direction: Direction,
    pub payload: Vec<u8>,
}

/// Transport-level send/receive primitive for one TBON edge. Implementors
/// own buffering and ordering for their edge; callers are expected to
/// drive many edges concurrently via `tokio::select!` in a single
/// scheduler task, not to block on one edge at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `record` on `channel`. Resolves once the record is durably
    /// queued on the edge, not once the peer has processed it.
    async fn send(&self, channel: ChannelId, record: Record) -> Result<()>;

    /// Receives the next record to arrive on any edge. Returns `None` once
    /// every edge has been shut down and no more records will ever arrive.
    async fn recv(&mut self) -> Option<(ChannelId, Record)>;

    /// Initiates an orderly shutdown of `channel`: no more sends are
    /// accepted, but records already queued still drain to `recv`.
    async fn shutdown(&self, channel: ChannelId) -> Result<()>;
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    pub(crate) fn sample_record(direction: Direction, payload: &[u8]) -> Record {
        Record {
            direction,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn channel_id_ordering_places_parent_first() {
        let mut ids = vec![ChannelId::Child(2), ChannelId::Parent, ChannelId::Child(0)];
        ids.sort();
        assert_eq!(ids, vec![ChannelId::Parent, ChannelId::Child(0), ChannelId::Child(2)]);
    }
}
