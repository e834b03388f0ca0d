//! Socket-backed transport for real deployments.
//!
//! Every edge is one TCP connection; records are framed as a big-endian
//! `u32` length prefix followed by a `bincode`-encoded [`Record`]. Each
//! connection's read half runs in its own task feeding a single inbound
//! channel, matching the single-consumer `recv` contract of [`Transport`]
//! — the scheduler still drains everything through one `tokio::select!`
//! arm rather than polling per-socket.

use super::{ChannelId, Record, Transport};
use crate::errors::{CoreError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

async fn write_frame(writer: &mut OwnedWriteHalf, record: &Record) -> Result<()> {
    let encoded = bincode::serialize(record)?;
    let len = u32::try_from(encoded.len())
        .map_err(|_| CoreError::Transport("record too large to frame".to_string()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&encoded).await?;
    Ok(())
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<Record>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CoreError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(CoreError::Transport(format!("frame of {len} bytes exceeds limit")));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}

pub struct TcpTransport {
    writers: DashMap<ChannelId, Arc<Mutex<OwnedWriteHalf>>>,
    inbound_tx: mpsc::Sender<(ChannelId, Record)>,
    inbound_rx: mpsc::Receiver<(ChannelId, Record)>,
}

impl TcpTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        TcpTransport {
            writers: DashMap::new(),
            inbound_tx,
            inbound_rx,
        }
    }

    /// Dials `addr` and registers the resulting connection as `channel`.
    pub async fn connect(&self, channel: ChannelId, addr: SocketAddr) -> Result<()> {
        let stream = TcpStream::connect(addr).await?;
        self.adopt(channel, stream);
        Ok(())
    }

    /// Accepts a single inbound connection on `listener` and registers it
    /// as `channel`. The caller owns the listener's lifetime and accept loop.
    pub async fn accept(&self, channel: ChannelId, listener: &TcpListener) -> Result<SocketAddr> {
        let (stream, peer) = listener.accept().await?;
        self.adopt(channel, stream);
        Ok(peer)
    }

    fn adopt(&self, channel: ChannelId, stream: TcpStream) {
        let (mut read_half, write_half) = stream.into_split();
        self.writers.insert(channel, Arc::new(Mutex::new(write_half)));

        let inbound_tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(record)) => {
                        if inbound_tx.send((channel, record)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(?channel, error = %e, "connection read failed, closing edge");
                        break;
                    }
                }
            }
        });
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, channel: ChannelId, record: Record) -> Result<()> {
        let writer = self
            .writers
            .get(&channel)
            .ok_or_else(|| CoreError::Transport(format!("no connection for {channel:?}")))?;
        let mut guard = writer.lock().await;
        write_frame(&mut guard, &record).await
    }

    async fn recv(&mut self) -> Option<(ChannelId, Record)> {
        self.inbound_rx.recv().await
    }

    async fn shutdown(&self, channel: ChannelId) -> Result<()> {
        if let Some((_, writer)) = self.writers.remove(&channel) {
            let mut guard = writer.lock().await;
            let _ = guard.shutdown().await;
        }
        Ok(())
    }
}
