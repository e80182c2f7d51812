use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

/// Something that looks enough like a WebSocket to carry JSON-RPC frames.
///
/// This crate never opens a socket itself — callers supply a
/// [`SocketFactory`] that produces one, which keeps the transport (real
/// WebSocket, an in-process test double, anything else) out of this
/// crate's dependency graph entirely.
pub trait Socket: Send + Sync {
    /// Queue a single text frame for the peer. Implementations should not
    /// block; a socket backed by a bounded channel should fail fast with
    /// [`TransportError::Write`] rather than apply backpressure here.
    fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Begin closing the connection. Idempotent.
    fn close(&self, code: u16, reason: &str);
}

/// Something a [`Socket`] implementation reports after the fact: an
/// inbound frame, the peer closing, or a transport-level error.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    Message(String),
    Closed { code: u16, reason: String },
    Error(String),
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketEvent::Message(frame) => write!(f, "message ({} bytes)", frame.len()),
            SocketEvent::Closed { code, reason } => write!(f, "closed ({code}, {reason:?})"),
            SocketEvent::Error(message) => write!(f, "error ({message})"),
        }
    }
}

/// Produces a connected [`Socket`] plus the stream of events it emits,
/// given the URL a session was opened with.
///
/// A factory is handed the URL rather than closing over one so that a
/// single factory can be reused across repeated `open()`/`resume()`
/// calls, e.g. one that appends a fresh auth token each time.
pub type SocketFactory = Arc<
    dyn Fn(&str) -> Result<(Box<dyn Socket>, tokio::sync::mpsc::UnboundedReceiver<SocketEvent>), TransportError>
        + Send
        + Sync,
>;
