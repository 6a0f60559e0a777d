//! Frame-level I/O to the browser client over `axum`'s WebSocket.
//!
//! Binary frames in are forwarded verbatim; JSON text frames out carry the
//! shapes in [`crate::events`]. No length framing beyond what the
//! underlying WebSocket already provides.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use interview_registry::SessionSocket;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::events::OutgoingEvent;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket write failed: {0}")]
    Write(String),
}

/// A single binary frame read from the client, or notice that the stream
/// ended (client EOF or normal close).
pub enum Inbound {
    Frame(Bytes),
    Closed,
}

/// The Client Socket Adapter's contract, independent of axum so the
/// supervisor can be tested against an in-memory double.
#[async_trait]
pub trait ClientSocket: Send + Sync {
    /// Reads the next binary frame. Intended to be driven by a single
    /// caller (the supervisor's Socket Reader loop).
    async fn recv_frame(&self) -> Inbound;
    async fn send_event(&self, event: OutgoingEvent) -> Result<(), SocketError>;
}

pub struct AxumClientSocket {
    sender: Mutex<SplitSink<WebSocket, Message>>,
    receiver: Mutex<SplitStream<WebSocket>>,
    closed: AtomicBool,
}

impl AxumClientSocket {
    pub fn new(socket: WebSocket) -> Self {
        let (sender, receiver) = socket.split();
        Self {
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ClientSocket for AxumClientSocket {
    async fn recv_frame(&self) -> Inbound {
        if self.closed.load(Ordering::SeqCst) {
            return Inbound::Closed;
        }
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.next().await {
                Some(Ok(Message::Binary(data))) => return Inbound::Frame(data),
                Some(Ok(Message::Close(_))) | None => return Inbound::Closed,
                Some(Ok(Message::Text(_))) => {
                    warn!("ignoring unexpected text frame from client, binary audio only");
                    continue;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "client socket read error, treating as closed");
                    return Inbound::Closed;
                }
            }
        }
    }

    async fn send_event(&self, event: OutgoingEvent) -> Result<(), SocketError> {
        let json = serde_json::to_string(&event).map_err(|e| SocketError::Write(e.to_string()))?;
        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SocketError::Write(e.to_string()))
    }
}

#[async_trait]
impl SessionSocket for AxumClientSocket {
    /// Best-effort close: marks the adapter closed so the next read
    /// observes it even if the close frame itself fails to send.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sender = self.sender.lock().await;
        let _ = sender.send(Message::Close(None)).await;
    }
}
