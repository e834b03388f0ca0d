//! Framed-record communication strategy (C2).
//!
//! Wraps a [`Transport`] with the reserved-token vocabulary every TBON
//! edge speaks (`MSG`/`SYNC`/`SHUTDOWN`/`PANIC`/`FLUSH`/`ACK`) and the
//! flood-control bookkeeping that decides whether the driver should keep
//! testing a given edge. A channel goes disabled once its unconsumed
//! backlog crosses `DISABLE_THRESHOLD` and stays disabled until it drains
//! back under `ENABLE_HYSTERESIS`, matching the original tool's named
//! constants (now configurable).

use crate::errors::Result;
use crate::transport::{ChannelId, Direction, Record, Transport};
use dashmap::DashMap;

/// The reserved record kinds every edge carries.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Token {
    /// An application-originated event: a matching or blocking-state op.
    Msg(Vec<u8>),
    /// Requests a synchronization barrier across the tree.
    Sync,
    /// Begins an orderly shutdown of this edge.
    Shutdown,
    /// A panic notification, flooded tree-wide exactly once per episode.
    Panic,
    /// Requests the peer flush any buffered records immediately.
    Flush,
    /// Acknowledges a prior `Sync` or `Flush`.
    Ack,
}

pub fn encode(token: &Token) -> Result<Vec<u8>> {
    Ok(bincode::serialize(token)?)
}

pub fn decode(bytes: &[u8]) -> Result<Token> {
    Ok(bincode::deserialize(bytes)?)
}

/// Per-channel backlog tracking, gating whether the driver should keep
/// polling this edge.
#[derive(Debug, Clone, Copy)]
struct FloodState {
    queue_size: u32,
    enabled: bool,
}

pub struct FloodControl {
    disable_threshold: u32,
    enable_hysteresis: u32,
    channels: DashMap<ChannelId, FloodState>,
}

impl FloodControl {
    pub fn new(disable_threshold: u32, enable_hysteresis: u32) -> Self {
        FloodControl {
            disable_threshold,
            enable_hysteresis,
            channels: DashMap::new(),
        }
    }

    fn state_for(&self, channel: ChannelId) -> dashmap::mapref::one::RefMut<'_, ChannelId, FloodState> {
        self.channels
            .entry(channel)
            .or_insert(FloodState { queue_size: 0, enabled: true })
    }

    /// Call when a record for `channel` arrives but has not yet been
    /// consumed by the driver.
    pub fn record_enqueue(&self, channel: ChannelId) {
        let mut state = self.state_for(channel);
        state.queue_size += 1;
        if state.enabled && state.queue_size > self.disable_threshold {
            state.enabled = false;
        }
    }

    /// Call when the driver consumes one record from `channel`'s backlog.
    pub fn record_dequeue(&self, channel: ChannelId) {
        let mut state = self.state_for(channel);
        state.queue_size = state.queue_size.saturating_sub(1);
        if !state.enabled && state.queue_size <= self.enable_hysteresis {
            state.enabled = true;
        }
    }

    pub fn is_enabled(&self, channel: ChannelId) -> bool {
        self.state_for(channel).enabled
    }

    pub fn queue_size(&self, channel: ChannelId) -> u32 {
        self.state_for(channel).queue_size
    }
}

/// Token-level view of one TBON node's edges, built on a concrete
/// [`Transport`].
pub struct Strategy<T: Transport> {
    transport: T,
    flood: FloodControl,
}

impl<T: Transport> Strategy<T> {
    pub fn new(transport: T, disable_threshold: u32, enable_hysteresis: u32) -> Self {
        Strategy {
            transport,
            flood: FloodControl::new(disable_threshold, enable_hysteresis),
        }
    }

    pub async fn send(&self, channel: ChannelId, direction: Direction, token: Token) -> Result<()> {
        let payload = encode(&token)?;
        self.transport.send(channel, Record { direction, payload }).await
    }

    /// Receives the next token from any edge, updating that edge's
    /// backlog counter before returning it.
    pub async fn recv(&mut self) -> Option<Result<(ChannelId, Direction, Token)>> {
        let (channel, record) = self.transport.recv().await?;
        self.flood.record_enqueue(channel);
        Some(decode(&record.payload).map(|token| (channel, record.direction, token)))
    }

    /// Marks one record on `channel` as consumed by the driver, possibly
    /// re-enabling the channel if its backlog has drained enough.
    pub fn mark_consumed(&self, channel: ChannelId) {
        self.flood.record_dequeue(channel);
    }

    pub fn is_channel_enabled(&self, channel: ChannelId) -> bool {
        self.flood.is_enabled(channel)
    }

    pub async fn shutdown(&self, channel: ChannelId) -> Result<()> {
        self.send(channel, Direction::Intra, Token::Shutdown).await?;
        self.transport.shutdown(channel).await
    }
}
