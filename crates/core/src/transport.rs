//! Transport Sink
//!
//! The outbound side of a client connection. The orchestrator pushes
//! acknowledgements, streamed chunks, errors and the terminal sentinel
//! through a [`TransportSink`]; the concrete transport (WebSocket, SSE, test
//! recorder) lives outside this workspace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{CoreError, CoreResult};

/// Terminal sentinel carried by the last `final` message of every request.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Kind of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkMessageKind {
    Chunk,
    Ack,
    Error,
    Final,
}

/// `{"type": "...", "message": "..."}` frame sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkMessage {
    #[serde(rename = "type")]
    pub kind: SinkMessageKind,
    pub message: String,
}

impl SinkMessage {
    pub fn chunk(message: impl Into<String>) -> Self {
        Self {
            kind: SinkMessageKind::Chunk,
            message: message.into(),
        }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        Self {
            kind: SinkMessageKind::Ack,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: SinkMessageKind::Error,
            message: message.into(),
        }
    }

    /// The `final` frame carrying [`DONE_SENTINEL`].
    pub fn done() -> Self {
        Self {
            kind: SinkMessageKind::Final,
            message: DONE_SENTINEL.to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.kind == SinkMessageKind::Final && self.message == DONE_SENTINEL
    }
}

/// Accepts outbound frames for one client connection.
#[async_trait]
pub trait TransportSink: Send + Sync {
    /// Deliver a frame. An error means the client is gone.
    async fn send(&self, message: SinkMessage) -> CoreResult<()>;
}

/// Sink backed by a tokio channel; the receiver side is the transport.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SinkMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl TransportSink for ChannelSink {
    async fn send(&self, message: SinkMessage) -> CoreResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| CoreError::transport("client channel closed"))
    }
}
