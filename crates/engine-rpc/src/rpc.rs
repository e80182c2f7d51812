use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use engine_rpc_events::NotificationBus;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{DecodeError, Error, TransportError};
use crate::msgs::{Notification, Request, RequestDraft, RequestId, Response, ResponseFrame};
use crate::socket::{Socket, SocketEvent, SocketFactory};

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Response, Error>>>>>;

/// Something a live [`Rpc`] reports to its owning session about the
/// transport itself, as opposed to a single request's outcome.
///
/// A weak back-reference to this is handed to [`Rpc::open`] so the
/// reader task can tell the difference between "the socket closed
/// because we asked it to" (a deliberate `suspend()`/`close()`, which
/// already drives its own state transition) and "the socket closed on
/// its own" (which the session needs to react to per `suspendOnClose`).
pub trait TransportObserver: Send + Sync {
    fn on_unsolicited_close(&self, code: u16, reason: String);
    fn on_socket_error(&self, message: String);
}

/// A single open connection's worth of request/response bookkeeping.
///
/// `Rpc` owns exactly one [`Socket`]. It is discarded and replaced, never
/// mutated in place, across a suspend/resume cycle — a fresh `Rpc` means a
/// fresh id sequence, which is why [`Rpc::open`] always starts `next_id`
/// at 1 rather than threading a counter through.
pub struct Rpc {
    socket: Box<dyn Socket>,
    pending: PendingRequests,
    next_id: AtomicU64,
    reader_task: JoinHandle<()>,
    expect_close: Arc<AtomicBool>,
}

impl Rpc {
    /// Opens a connection via `factory` and starts routing frames.
    ///
    /// `notifications` is supplied by the caller (a [`crate::session::Session`]
    /// keeps one across its whole lifetime) rather than created here, so
    /// standalone-notification subscriptions survive a suspend/resume
    /// cycle even though the `Rpc` itself is discarded and rebuilt.
    pub async fn open(
        url: &str,
        factory: &SocketFactory,
        notifications: Arc<NotificationBus<Value>>,
        observer: Weak<dyn TransportObserver>,
    ) -> Result<Self, Error> {
        let (socket, events) = factory(url).map_err(Error::Transport)?;
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let expect_close = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(reader_loop(
            events,
            pending.clone(),
            notifications,
            observer,
            expect_close.clone(),
        ));

        Ok(Self {
            socket,
            pending,
            next_id: AtomicU64::new(1),
            reader_task,
            expect_close,
        })
    }

    /// Allocates the id the next request will use, without sending
    /// anything — request interceptors need the id before the draft they
    /// transform is handed to [`Rpc::send`].
    pub fn allocate_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Writes `draft` to the socket under the already-allocated `id`, and
    /// returns a handle to await the matching response on.
    pub async fn send(&self, id: RequestId, draft: RequestDraft) -> Result<SentRequest, Error> {
        let request = Request::from_draft(draft, id);
        let frame = serde_json::to_string(&request).map_err(DecodeError::from)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.pending.lock().await;
            guard.insert(id, tx);
        }

        if let Err(err) = self.socket.send(frame) {
            self.pending.lock().await.remove(&id);
            return Err(Error::Transport(err));
        }

        trace!(request_id = id, method = %request.method, "sent request");
        Ok(SentRequest { id, rx })
    }

    /// Begins closing the socket. Does not wait for the peer to
    /// acknowledge; in-flight requests are failed once the reader loop
    /// observes the close.
    ///
    /// Marks the close as expected first, so the reader task doesn't
    /// report it to the [`TransportObserver`] as an unsolicited close —
    /// the caller (a deliberate `suspend()`/`close()`) already owns the
    /// resulting state transition.
    pub fn close(&self, code: u16, reason: &str) {
        self.expect_close.store(true, Ordering::SeqCst);
        self.socket.close(code, reason);
    }
}

impl Drop for Rpc {
    fn drop(&mut self) {
        self.expect_close.store(true, Ordering::SeqCst);
        self.reader_task.abort();
        self.socket.close(1000, "session dropped");
    }
}

/// A request that has already been written to the socket.
///
/// Exposes [`SentRequest::request_id`] so callers (and request
/// interceptors, which receive it alongside the frame) can correlate a
/// future with the id that went on the wire, without the future itself
/// needing to resolve first.
pub struct SentRequest {
    id: RequestId,
    rx: oneshot::Receiver<Result<Response, Error>>,
}

impl SentRequest {
    pub fn request_id(&self) -> RequestId {
        self.id
    }
}

impl Future for SentRequest {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Transport(TransportError::Socket(
                "connection dropped before a response arrived".to_string(),
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn reader_loop(
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    pending: PendingRequests,
    notifications: Arc<NotificationBus<Value>>,
    observer: Weak<dyn TransportObserver>,
    expect_close: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Message(frame) => handle_frame(&frame, &pending, &notifications).await,
            SocketEvent::Closed { code, reason } => {
                debug!(code, %reason, "socket closed");
                fail_all_pending(
                    &pending,
                    Error::Transport(TransportError::UnexpectedClose { code, reason: reason.clone() }),
                )
                .await;
                if !expect_close.load(Ordering::SeqCst) {
                    if let Some(observer) = observer.upgrade() {
                        observer.on_unsolicited_close(code, reason);
                    }
                }
                return;
            }
            SocketEvent::Error(message) => {
                warn!(%message, "socket reported an error");
                if let Some(observer) = observer.upgrade() {
                    observer.on_socket_error(message);
                }
            }
        }
    }

    if !expect_close.load(Ordering::SeqCst) {
        fail_all_pending(
            &pending,
            Error::Transport(TransportError::Socket("socket event stream ended".to_string())),
        )
        .await;
        if let Some(observer) = observer.upgrade() {
            observer.on_unsolicited_close(1006, "socket event stream ended".to_string());
        }
    }
}

async fn handle_frame(frame: &str, pending: &PendingRequests, notifications: &Arc<NotificationBus<Value>>) {
    let value: Value = match serde_json::from_str(frame) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "received malformed frame");
            return;
        }
    };

    if value.get("id").is_some() {
        let parsed: ResponseFrame = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "failed to parse response frame");
                return;
            }
        };
        let id = parsed.id;
        let response = match Response::try_from(parsed) {
            Ok(response) => response,
            Err(err) => {
                deliver(pending, id, Err(Error::Protocol(err))).await;
                return;
            }
        };
        deliver(pending, id, Ok(response)).await;
    } else if value.get("method").is_some() {
        match serde_json::from_value::<Notification>(value) {
            Ok(notification) => notifications.publish(&notification.method, notification.params),
            Err(err) => warn!(%err, "failed to parse notification frame"),
        }
    } else {
        warn!("received frame that is neither a response nor a notification");
    }
}

async fn deliver(pending: &PendingRequests, id: RequestId, result: Result<Response, Error>) {
    let sender = pending.lock().await.remove(&id);
    match sender {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => {
            let err = DecodeError::UnknownRequestId(id);
            warn!(request_id = id, %err, "dropping frame for unknown request id");
        }
    }
}

async fn fail_all_pending(pending: &PendingRequests, error: Error) {
    let mut guard = pending.lock().await;
    for (_, tx) in guard.drain() {
        let _ = tx.send(Err(error.clone()));
    }
}
