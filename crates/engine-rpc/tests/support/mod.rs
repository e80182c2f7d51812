//! Shared in-memory socket double for integration tests.
//!
//! Integration tests only see `engine-rpc`'s public API, so this can't
//! reuse the crate's own `#[cfg(test)]`-only `test_support` module —
//! it's a small, separate implementation of the same idea against the
//! public `Socket` trait.

use std::sync::{Arc, Mutex};

use engine_rpc::{Socket, SocketEvent, SocketFactory, TransportError};
use tokio::sync::mpsc;

pub struct MockSocket {
    sent: mpsc::UnboundedSender<String>,
}

impl Socket for MockSocket {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        self.sent
            .send(frame)
            .map_err(|_| TransportError::Write("mock socket closed".to_string()))
    }

    fn close(&self, _code: u16, _reason: &str) {}
}

pub struct MockServer {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

/// A one-shot factory: the first call succeeds with a fresh socket pair,
/// every subsequent call fails. Use [`resumable_socket_factory`] for
/// tests that open more than once.
pub fn one_shot_socket_factory() -> (SocketFactory, MockServer) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let socket = MockSocket { sent: sent_tx };
    let server = MockServer { sent: sent_rx, events: event_tx };

    let cell = Mutex::new(Some((Box::new(socket) as Box<dyn Socket>, event_rx)));
    let factory: SocketFactory = Arc::new(move |_url: &str| {
        cell.lock().expect("poisoned").take().ok_or_else(|| TransportError::Open {
            url: "mock".to_string(),
            reason: "one-shot mock socket factory used more than once".to_string(),
        })
    });

    (factory, server)
}

/// A factory that hands out a fresh socket pair on every call, pushing
/// each new pair's server handle onto `new_servers` so a test driving a
/// `resume()` can pick up the connection that followed the first.
pub fn resumable_socket_factory() -> (SocketFactory, mpsc::UnboundedReceiver<MockServer>) {
    let (new_servers_tx, new_servers_rx) = mpsc::unbounded_channel();

    let factory: SocketFactory = Arc::new(move |_url: &str| {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let socket = MockSocket { sent: sent_tx };
        let _ = new_servers_tx.send(MockServer { sent: sent_rx, events: event_tx });
        Ok((Box::new(socket) as Box<dyn Socket>, event_rx))
    });

    (factory, new_servers_rx)
}
