//! An in-memory stand-in for a real socket, used by this crate's own unit
//! and integration tests. Not part of the public API.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::socket::{Socket, SocketEvent, SocketFactory};

/// A [`Socket`] backed by channels instead of a network connection.
///
/// Frames sent via [`Socket::send`] land on `sent`, where a test can
/// inspect them and, if it wants to simulate a server reply, push a
/// [`SocketEvent::Message`] back onto the paired event channel returned
/// alongside this socket.
pub struct MockSocket {
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
}

impl Socket for MockSocket {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        self.sent.send(frame).map_err(|_| TransportError::Write("mock socket closed".to_string()))
    }

    fn close(&self, code: u16, reason: &str) {
        *self.closed.lock().expect("poisoned") = Some((code, reason.to_string()));
    }
}

/// One end of a connected [`MockSocket`] pair: what the "server" side
/// sees sent, and what it can push back as inbound events.
pub struct MockServerHandle {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
    pub closed: Arc<Mutex<Option<(u16, String)>>>,
}

/// Builds a [`SocketFactory`] that always hands back the same
/// preconnected `MockSocket`/`MockServerHandle` pair, ignoring the URL
/// it's called with. Good enough for a single open()/resume() in a test;
/// tests that open multiple times should build a fresh factory per call.
pub fn mock_socket_factory() -> (SocketFactory, MockServerHandle) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(Mutex::new(None));

    let socket = MockSocket { sent: sent_tx, closed: closed.clone() };
    let server = MockServerHandle { sent: sent_rx, events: event_tx, closed };

    let boxed: Box<dyn Socket> = Box::new(socket);
    let cell = Mutex::new(Some((boxed, event_rx)));

    let factory: SocketFactory = Arc::new(move |_url: &str| {
        cell.lock()
            .expect("poisoned")
            .take()
            .ok_or_else(|| TransportError::Open {
                url: "mock".to_string(),
                reason: "mock socket factory used more than once".to_string(),
            })
    });

    (factory, server)
}
