//! One-way message channels the bridge can run over
//!
//! A [`MessageSink`] posts messages fire-and-forget; the receiving half is a
//! plain `mpsc::Receiver`. Two transports are provided: an in-process pair of
//! tokio channels and newline-delimited JSON over any async byte stream.

use crate::utils::error::BridgeError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use super::messages::{HostMessage, IsolatedMessage};

/// Capacity of in-process and decoded-stream queues
pub const CHANNEL_CAPACITY: usize = 256;

/// Outbound half of a channel
#[async_trait]
pub trait MessageSink<M>: Send + Sync {
    /// Post a message; delivery is not acknowledged
    async fn post(&self, message: M) -> Result<(), BridgeError>;
}

#[async_trait]
impl<M: Send + 'static> MessageSink<M> for mpsc::Sender<M> {
    async fn post(&self, message: M) -> Result<(), BridgeError> {
        self.send(message)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Isolated-side ends of an in-process channel
pub struct IsolatedEnd {
    pub outbound: mpsc::Sender<IsolatedMessage>,
    pub inbound: mpsc::Receiver<HostMessage>,
}

/// Host-side ends of an in-process channel
pub struct HostEnd {
    pub outbound: mpsc::Sender<HostMessage>,
    pub inbound: mpsc::Receiver<IsolatedMessage>,
}

/// Create a connected in-process channel pair
pub fn in_process_pair() -> (IsolatedEnd, HostEnd) {
    let (to_host, from_isolated) = mpsc::channel(CHANNEL_CAPACITY);
    let (to_isolated, from_host) = mpsc::channel(CHANNEL_CAPACITY);
    (
        IsolatedEnd {
            outbound: to_host,
            inbound: from_host,
        },
        HostEnd {
            outbound: to_isolated,
            inbound: from_isolated,
        },
    )
}

/// Writes each message as one JSON line
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<M, W> MessageSink<M> for JsonLinesSink<W>
where
    M: Serialize + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    async fn post(&self, message: M) -> Result<(), BridgeError> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Decode JSON lines from `reader` into a channel
///
/// Undecodable lines are logged and skipped. The returned receiver closes
/// when the stream ends or fails.
pub fn spawn_json_lines_reader<M, R>(reader: R) -> mpsc::Receiver<M>
where
    M: DeserializeOwned + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<M>(&line) {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Skipping undecodable message"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Message stream failed");
                    break;
                }
            }
        }
        tracing::debug!("Message stream closed");
    });

    rx
}
