//! Streaming ASR client.
//!
//! Maintains a bidirectional session with a remote speech-to-text service:
//! sends audio, receives typed transcript events, and recovers from
//! transport loss with bounded reconnection (the reconnection policy
//! itself lives in `interview-supervisor`; this crate only exposes the
//! primitives it reconnects with).
//!
//! This client targets the provider's [`protocol::DEFAULT_WS_PATH`]
//! variant of its realtime API rather than the legacy `/v2/realtime/ws`
//! path.

mod client;
pub mod error;
pub mod protocol;

pub use client::{AsrBackend, AsrClient, AsrSession, WsAsrBackend};
pub use error::{status_code, AsrError, Result};
pub use protocol::{AsrConfig, ClientMessage, ServerMessage, TranscriptEvent, TranscriptKind};
