use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::handle::Handle;

/// Every way a session, request, or reconciliation attempt can fail.
///
/// One variant per failure mode from the error-handling design, each
/// carrying exactly the data a caller needs to react — never a bare
/// `String`.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// The socket failed to open, closed unexpectedly, or failed a write.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A frame from the server could not be parsed as a request, response,
    /// or notification, or referenced an unknown request id.
    #[error("protocol violation: {0}")]
    Protocol(#[from] DecodeError),

    /// The server answered with a JSON-RPC error body.
    #[error("engine returned error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        parameter: Option<Value>,
    },

    /// `send` was attempted while the session was suspended or closed.
    #[error("{0}")]
    State(#[from] StateError),

    /// A cached object could not be recovered during `resume()` while
    /// `onlyIfAttached` was set.
    #[error("could not reattach handle {handle}: {reason}")]
    Reattach { handle: Handle, reason: String },
}

/// Transport-level failure: the socket itself, not the protocol riding on
/// it, is the problem.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("socket factory rejected url {url:?}: {reason}")]
    Open { url: String, reason: String },

    #[error("write to socket failed: {0}")]
    Write(String),

    #[error("socket closed unexpectedly (code={code}, reason={reason:?})")]
    UnexpectedClose { code: u16, reason: String },

    #[error("socket reported an error: {0}")]
    Socket(String),
}

/// `send()` was attempted outside a state that can carry requests.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("session suspended")]
    Suspended,
    #[error("session closed")]
    Closed,
    #[error("no socket established")]
    NotConnected,
}

/// Error decoding a single JSON-RPC frame off the wire.
#[derive(Debug, Error, Clone)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(Arc<serde_json::Error>),
    #[error("frame had neither a result nor an error body")]
    MissingResultAndError,
    #[error("response referenced unknown request id {0}")]
    UnknownRequestId(crate::msgs::RequestId),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(Arc::new(e))
    }
}
