//! In-process transport backed by bounded `tokio::sync::mpsc` channels.
//!
//! One [`MpscTransport`] owns the receiving end of every edge incident to
//! this node and a sender handle for each; wiring two nodes together means
//! handing each node the other's sender. This is what the seed-scenario
//! tests in `tests/` run against — no sockets, no serialization round
//! trip, just the scheduling and matching logic under test.

use super::{ChannelId, Record, Transport};
use crate::errors::{CoreError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

const EDGE_CAPACITY: usize = 1024;

pub struct MpscTransport {
    senders: DashMap<ChannelId, mpsc::Sender<Record>>,
    receiver: mpsc::Receiver<(ChannelId, Record)>,
    /// Retained so `recv` can detect "every edge shut down" by reference
    /// count, since `tokio::sync::mpsc::Receiver` has no `is_closed` that
    /// distinguishes "no senders left" from "temporarily empty".
    inbound_sender: mpsc::Sender<(ChannelId, Record)>,
}

/// One endpoint of an edge: hand this to the peer node so it can reach us.
pub struct EdgeHandle {
    channel: ChannelId,
    sender: mpsc::Sender<(ChannelId, Record)>,
}

impl MpscTransport {
    pub fn new() -> Self {
        let (inbound_sender, receiver) = mpsc::channel(EDGE_CAPACITY);
        MpscTransport {
            senders: DashMap::new(),
            receiver,
            inbound_sender,
        }
    }

    /// Registers an outbound sender for `channel`. The caller is expected
    /// to have obtained a matching [`EdgeHandle`] from the peer's
    /// [`Self::attach_edge`] and fed it into the peer's own transport.
    pub fn connect(&self, channel: ChannelId, sender: mpsc::Sender<Record>) {
        self.senders.insert(channel, sender);
    }

    /// Produces a handle the peer can use to reach this node's inbox on
    /// `channel`, plus the `Sender<Record>` this node should keep to speak
    /// back to the peer on the same logical edge.
    pub fn attach_edge(&self, channel: ChannelId) -> (EdgeHandle, mpsc::Sender<Record>) {
        let (record_tx, mut record_rx) = mpsc::channel::<Record>(EDGE_CAPACITY);
        let inbound = self.inbound_sender.clone();
        let tagged_channel = channel;
        tokio::spawn(async move {
            while let Some(record) = record_rx.recv().await {
                if inbound.send((tagged_channel, record)).await.is_err() {
                    break;
                }
            }
        });
        (
            EdgeHandle {
                channel,
                sender: self.inbound_sender.clone(),
            },
            record_tx,
        )
    }
}

impl Default for MpscTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MpscTransport {
    async fn send(&self, channel: ChannelId, record: Record) -> Result<()> {
        let sender = self
            .senders
            .get(&channel)
            .ok_or_else(|| CoreError::Transport(format!("no edge registered for {channel:?}")))?;
        sender
            .send(record)
            .await
            .map_err(|_| CoreError::ChannelSend)
    }

    async fn recv(&mut self) -> Option<(ChannelId, Record)> {
        self.receiver.recv().await
    }

    async fn shutdown(&self, channel: ChannelId) -> Result<()> {
        if self.senders.remove(&channel).is_none() {
            warn!(?channel, "shutdown requested for an edge that was never connected");
        }
        Ok(())
    }
}

// `EdgeHandle` is only a labeled capability today; its fields back the
// attach/connect handshake above and are read through `connect`.
impl EdgeHandle {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn sender(&self) -> mpsc::Sender<(ChannelId, Record)> {
        self.sender.clone()
    }
}
