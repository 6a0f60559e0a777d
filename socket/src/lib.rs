//! Client Socket Adapter: frame-level I/O to the browser client.
//!
//! Binary WebSocket frames in, JSON text frames out. No length framing
//! beyond what the underlying WebSocket already provides.

mod adapter;
mod events;

pub use adapter::{AxumClientSocket, ClientSocket, Inbound, SocketError};
pub use events::{ErrorType, OutgoingEvent};
