//! Write paths shared by the connection, the heartbeat loop and the burst
//! consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::burst::BurstWriter;
use crate::heartbeat::{HeartbeatResult, HeartbeatSender};
use crate::protocol::{HeartbeatSequencer, classify_reply};
use crate::transport::UartClient;
use crate::types::{AckType, Clock, Lens, PerLens, Target};
use crate::{LinkError, Result};

/// Acknowledgment of one command write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReply {
    pub lens: Lens,
    pub opcode: u8,
    /// Receive time of the ack
    pub timestamp: u64,
    pub latency_ms: u64,
    pub ack_type: AckType,
}

#[derive(Clone)]
pub(crate) struct Links {
    clients: PerLens<UartClient>,
    clock: Arc<dyn Clock>,
    ack_timeout: Duration,
    sequencer: Arc<HeartbeatSequencer>,
}

impl std::fmt::Debug for Links {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Links").field("clients", &self.clients).field("ack_timeout", &self.ack_timeout).finish()
    }
}

impl Links {
    pub(crate) fn new(clients: PerLens<UartClient>, clock: Arc<dyn Clock>, ack_timeout: Duration) -> Self {
        Self { clients, clock, ack_timeout, sequencer: Arc::new(HeartbeatSequencer::new()) }
    }

    pub(crate) fn client(&self, lens: Lens) -> &UartClient {
        &self.clients[lens]
    }

    pub(crate) fn clients(&self) -> &PerLens<UartClient> {
        &self.clients
    }

    pub(crate) fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub(crate) fn reset_sequence(&self, lens: Lens) {
        self.sequencer.reset(lens);
    }

    /// Fire-and-forget write on an armed link.
    pub(crate) async fn write(&self, lens: Lens, bytes: &[u8]) -> Result<()> {
        let client = &self.clients[lens];
        if !client.is_armed() {
            return Err(LinkError::NotConnected { lens });
        }
        if client.write(bytes, false).await {
            Ok(())
        } else {
            Err(LinkError::write_failed(lens, bytes.len()))
        }
    }

    /// Write a command and wait for the reply that acknowledges its opcode.
    pub(crate) async fn command(&self, lens: Lens, bytes: &[u8]) -> Result<CommandReply> {
        let Some(&opcode) = bytes.first() else {
            return Err(LinkError::write_failed(lens, 0));
        };
        // Subscribe before writing so a fast reply is not missed
        let mut frames = self.clients[lens].frames();
        let sent_at = self.clock.now_millis();
        self.write(lens, bytes).await?;

        let reply = async {
            loop {
                match frames.recv().await {
                    Ok(frame) => {
                        if let Some(reply) = classify_reply(&frame.bytes, opcode) {
                            return Ok((frame.timestamp, reply));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(lens = %lens, skipped, "Reply watcher lagged");
                    }
                    Err(RecvError::Closed) => return Err(LinkError::ChannelClosed { channel: "frames" }),
                }
            }
        };
        let (timestamp, reply) = tokio::time::timeout(self.ack_timeout, reply)
            .await
            .map_err(|_| LinkError::timeout(self.ack_timeout))??;

        if !reply.success {
            return Err(LinkError::Rejected { lens, opcode, busy: reply.busy });
        }
        let latency_ms = timestamp.saturating_sub(sent_at);
        Ok(CommandReply { lens, opcode, timestamp, latency_ms, ack_type: reply.ack_type })
    }
}

#[async_trait::async_trait]
impl HeartbeatSender for Links {
    async fn send_heartbeat(&self, lens: Lens) -> Option<HeartbeatResult> {
        let (frame, sequence) = self.sequencer.next_frame(lens);
        match self.command(lens, &frame).await {
            Ok(reply) => Some(HeartbeatResult {
                sequence,
                success: true,
                timestamp: Some(reply.timestamp),
                latency_ms: Some(reply.latency_ms),
                ack_type: Some(reply.ack_type),
            }),
            Err(LinkError::Rejected { .. }) | Err(LinkError::Timeout { .. }) => {
                debug!(lens = %lens, sequence, "Heartbeat not acknowledged");
                Some(HeartbeatResult { sequence, success: false, timestamp: None, latency_ms: None, ack_type: None })
            }
            Err(err) => {
                warn!(lens = %lens, error = %err, "Heartbeat write failed");
                None
            }
        }
    }

    fn is_link_up(&self, lens: Lens) -> bool {
        self.clients[lens].is_armed()
    }
}

#[async_trait::async_trait]
impl BurstWriter for Links {
    async fn write_chunk(&self, bytes: &[u8], target: Target) -> bool {
        let mut delivered = true;
        for &lens in target.lenses() {
            if let Err(err) = self.write(lens, bytes).await {
                warn!(lens = %lens, error = %err, "Chunk write failed");
                delivered = false;
            }
        }
        delivered
    }
}
