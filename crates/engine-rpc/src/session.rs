use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use engine_rpc_events::{Bus, NotificationBus, Subscription};
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{ApiCache, CacheEntry, CacheEvent};
use crate::config::{ReattachPolicy, SessionConfig};
use crate::error::{Error, StateError};
use crate::handle::Handle;
use crate::interceptor::{run_request_chain, run_response_chain};
use crate::msgs::{Reply, RequestDraft};
use crate::proxy::{MethodSet, Proxy, ProxyHost};
use crate::rpc::{Rpc, TransportObserver};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The close code a deliberate, user-initiated shutdown uses. A close
/// reported under this code always terminates the session, even when
/// `suspend_on_close` is set — only a close under any other code is
/// eligible to become a suspend.
const USER_INITIATED_CLOSE_CODE: u16 = 1000;

/// The type name the global-handle entry is cached under. The global
/// handle has no server-assigned type of its own — this is just the
/// label `Session::global()` and the cache's insertion step agree on.
const GLOBAL_TYPE_NAME: &str = "Global";

/// Where a session is in its lifecycle.
///
/// Transitions: `Created` -> `Opening` -> `Opened` -> (`Suspending` ->
/// `Suspended` -> `Resuming` -> `Opened`)* -> `Closing` -> `Closed`.
/// `Closed` is terminal; every other state can reach it via `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Opening = 1,
    Opened = 2,
    Suspending = 3,
    Suspended = 4,
    Resuming = 5,
    Closing = 6,
    Closed = 7,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Opening,
            2 => SessionState::Opened,
            3 => SessionState::Suspending,
            4 => SessionState::Suspended,
            5 => SessionState::Resuming,
            6 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Events a [`Session`] publishes about its own lifecycle, as opposed to
/// the handle-scoped [`CacheEvent`]s or the server's own notifications.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opened,
    Closed { code: u16, reason: String },
    Suspended,
    Resumed { closed: Vec<Handle> },
    SocketError(String),
}

/// What a successful [`Session::resume`] reconciled.
///
/// `closed` lists every cached handle that could not be reattached and
/// was therefore dropped from the cache — always empty unless
/// [`ReattachPolicy::BestEffort`] is in effect, since
/// [`ReattachPolicy::OnlyIfAttached`] turns the same condition into an
/// `Err` instead.
#[derive(Debug, Clone, Default)]
pub struct ResumeOutcome {
    pub closed: Vec<Handle>,
}

/// A client connection to the engine: the public handle callers hold.
///
/// Cloning a `Session` is cheap and shares the same underlying state —
/// it's an `Arc` around [`SessionInner`], handed out this way so
/// [`Proxy`] can hold a [`Weak`] back-reference without creating a
/// session -> cache -> proxy -> session cycle.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    state: AtomicU8,
    rpc: AsyncMutex<Option<Rpc>>,
    open_lock: AsyncMutex<()>,
    /// Serializes `suspend()`/`resume()`/`close()` against each other and
    /// against [`SessionInner::on_unsolicited_close`], so a socket that
    /// drops mid-`resume()` doesn't race the resume's own transition.
    lifecycle_lock: AsyncMutex<()>,
    cache: ApiCache,
    notifications: Arc<NotificationBus<Value>>,
    events: Bus<SessionEvent>,
}

impl Session {
    /// Creates a session in the `Created` state. Call [`Session::open`] to
    /// actually connect.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                state: AtomicU8::new(SessionState::Created as u8),
                rpc: AsyncMutex::new(None),
                open_lock: AsyncMutex::new(()),
                lifecycle_lock: AsyncMutex::new(()),
                cache: ApiCache::new(),
                notifications: Arc::new(NotificationBus::new()),
                events: Bus::new(),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::SeqCst);
    }

    /// Connects the socket. Idempotent: a second concurrent or repeated
    /// call to `open()` while the first is still in flight (or has
    /// already succeeded) waits on the same underlying attempt rather
    /// than racing a second connection.
    pub async fn open(&self) -> Result<(), Error> {
        let _guard = self.inner.open_lock.lock().await;

        if self.state() == SessionState::Opened {
            return Ok(());
        }
        if self.state() == SessionState::Closed {
            return Err(Error::State(StateError::Closed));
        }

        self.set_state(SessionState::Opening);
        let observer: Weak<dyn TransportObserver> = Arc::downgrade(&self.inner);
        let rpc = tokio::time::timeout(
            self.inner.config.open_timeout,
            Rpc::open(&self.inner.config.url, &self.inner.config.socket_factory, self.inner.notifications.clone(), observer),
        )
        .await
        .map_err(|_| {
            Error::Transport(crate::error::TransportError::Open {
                url: self.inner.config.url.clone(),
                reason: "timed out waiting to connect".to_string(),
            })
        })??;

        *self.inner.rpc.lock().await = Some(rpc);
        self.inner.cache.get_or_insert(Handle::GLOBAL, GLOBAL_TYPE_NAME);
        self.set_state(SessionState::Opened);
        self.inner.events.publish(SessionEvent::Opened);
        info!(url = %self.inner.config.url, "session opened");
        Ok(())
    }

    /// Sends a request and runs its response through the interceptor
    /// chain, returning the final extracted value tagged with the id the
    /// request was assigned (see [`Reply`]).
    pub async fn send(&self, draft: RequestDraft) -> Result<Reply, Error> {
        send_on(&self.inner, self.state(), draft).await
    }

    /// Returns the cached proxy for `handle`, creating one via the
    /// session's configured [`crate::proxy::ProxyFactory`] if none exists
    /// yet. Calling this again for the same handle returns a proxy over
    /// the same underlying [`crate::cache::HandleSlot`], so at most one
    /// logical proxy identity exists per handle.
    pub fn proxy(self: &Session, handle: Handle, type_name: &str) -> Proxy {
        let slot = self.inner.cache.get_or_insert(handle, type_name);
        let methods: MethodSet = self.inner.config.proxy_factory.generate(type_name);
        let host: Weak<dyn ProxyHost> = Arc::downgrade(&self.inner);
        Proxy::new(slot, methods, host)
    }

    /// The always-present root proxy every session starts from.
    pub fn global(self: &Session, type_name: &str) -> Proxy {
        self.proxy(Handle::GLOBAL, type_name)
    }

    pub fn subscribe_notifications(&self, method: &str) -> Subscription<Value> {
        self.inner.notifications.subscribe(method)
    }

    pub fn subscribe_all_notifications(&self) -> Subscription<(String, Value)> {
        self.inner.notifications.subscribe_all()
    }

    pub fn subscribe_cache_events(&self) -> Subscription<CacheEvent> {
        self.inner.cache.events().subscribe()
    }

    /// Subscribes to session-lifecycle events: `opened`, `closed`,
    /// `suspended`, `resumed`, `socket-error`.
    pub fn subscribe_events(&self) -> Subscription<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Registers a callback invoked for every notification on `method`.
    ///
    /// Runs on a dedicated task for the lifetime of the returned
    /// [`JoinHandle`] (drop or abort it to stop listening). A panic inside
    /// `handler` is caught and logged rather than tearing down the task or
    /// the session — one bad handler invocation shouldn't take the whole
    /// notification stream down with it.
    pub fn on_notification<F>(&self, method: &str, handler: F) -> JoinHandle<()>
    where
        F: Fn(Value) + Send + 'static,
    {
        let mut sub = self.inner.notifications.subscribe(method);
        tokio::spawn(async move {
            while let Some(payload) = sub.recv().await {
                if std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                    warn!("notification handler panicked");
                }
            }
        })
    }

    /// Drops the transport while preserving the proxy cache, so
    /// in-progress work can pick back up via [`Session::resume`] without
    /// callers needing to reacquire every proxy they were holding.
    pub async fn suspend(&self) -> Result<(), Error> {
        let _guard = self.inner.lifecycle_lock.lock().await;
        if self.state() != SessionState::Opened {
            return Err(Error::State(StateError::NotConnected));
        }
        self.set_state(SessionState::Suspending);
        let rpc = self.inner.rpc.lock().await.take();
        if let Some(rpc) = rpc {
            rpc.close(1000, "suspended");
        }
        self.set_state(SessionState::Suspended);
        self.inner.events.publish(SessionEvent::Suspended);
        Ok(())
    }

    /// Reopens the transport and reconciles every cached handle against
    /// the new connection.
    ///
    /// Reattachment is fanned out concurrently rather than one handle at
    /// a time, since the handles are independent of each other and the
    /// server has no reason to expect them serialized. A successful
    /// reattach may rekey a cached handle to a new server-issued one
    /// (`crate::cache::ApiCache::rekey`) while the caller's `Proxy`
    /// identity stays the same. Under [`ReattachPolicy::OnlyIfAttached`] a
    /// single "object no longer exists" failure fails the whole resume
    /// and the session moves to `Closed`; under
    /// [`ReattachPolicy::BestEffort`] such handles are evicted from the
    /// cache, reported via [`ResumeOutcome::closed`], and `resume()`
    /// still succeeds. A transport-level failure while reattaching always
    /// aborts the resume and returns the session to `Suspended`,
    /// regardless of policy.
    pub async fn resume(&self) -> Result<ResumeOutcome, Error> {
        let _guard = self.inner.lifecycle_lock.lock().await;
        if self.state() != SessionState::Suspended {
            return Err(Error::State(StateError::NotConnected));
        }
        self.set_state(SessionState::Resuming);

        let observer: Weak<dyn TransportObserver> = Arc::downgrade(&self.inner);
        let rpc = Rpc::open(&self.inner.config.url, &self.inner.config.socket_factory, self.inner.notifications.clone(), observer).await;
        let rpc = match rpc {
            Ok(rpc) => rpc,
            Err(err) => {
                self.set_state(SessionState::Suspended);
                return Err(err);
            }
        };
        *self.inner.rpc.lock().await = Some(rpc);
        self.set_state(SessionState::Opened);

        // The global handle is always present and never issued by the
        // server, so it has nothing to reattach against.
        let entries: Vec<_> = self.inner.cache.entries_in_order().into_iter().filter(|entry| !entry.handle().is_global()).collect();
        let reattached = join_all(entries.into_iter().map(|entry| self.reattach(entry))).await;

        let mut closed = Vec::new();
        let mut attach_failure = None;
        for outcome in reattached {
            match outcome {
                Ok(ReattachOutcome::Reattached { old, new }) => {
                    if old != new {
                        self.inner.cache.rekey(old, new);
                    }
                }
                Ok(ReattachOutcome::Lost(handle)) => match self.inner.config.reattach_policy {
                    ReattachPolicy::OnlyIfAttached => {
                        attach_failure.get_or_insert(handle);
                    }
                    ReattachPolicy::BestEffort => {
                        warn!(%handle, "dropping handle that failed to reattach");
                        self.inner.cache.remove(handle);
                        closed.push(handle);
                    }
                },
                Err(err) => {
                    // a transport error while reattaching aborts the whole
                    // resume, independent of reattach policy. Tear the
                    // freshly reopened socket back down rather than leaving
                    // it connected under a Suspended session.
                    if let Some(rpc) = self.inner.rpc.lock().await.take() {
                        rpc.close(1011, "resume aborted");
                    }
                    self.set_state(SessionState::Suspended);
                    return Err(err);
                }
            }
        }

        if let Some(handle) = attach_failure {
            self.close_locked(1011, "reattach failed under onlyIfAttached").await;
            return Err(Error::Reattach { handle, reason: "object no longer exists".to_string() });
        }

        self.inner.events.publish(SessionEvent::Resumed { closed: closed.clone() });
        info!(lost = closed.len(), "session resumed");
        Ok(ResumeOutcome { closed })
    }

    /// Attempts to reattach one cached entry: asks the global handle for
    /// the current handle of the object `entry` was built from. A
    /// JSON-RPC error body is treated as "object no longer exists"; any
    /// other failure (transport, decode, state) is a real abort signal.
    async fn reattach(&self, entry: CacheEntry) -> Result<ReattachOutcome, Error> {
        let old = entry.handle();
        let draft = RequestDraft::new("reattach", Handle::GLOBAL, json!({ "handle": old.0 }));
        match self.send(draft).await {
            Ok(value) => {
                let new = value.get("handle").and_then(Value::as_i64).map(Handle).unwrap_or(old);
                Ok(ReattachOutcome::Reattached { old, new })
            }
            Err(Error::Rpc { .. }) => Ok(ReattachOutcome::Lost(old)),
            Err(other) => Err(other),
        }
    }

    /// Closes the session. Idempotent.
    pub async fn close(&self, code: u16, reason: &str) {
        let _guard = self.inner.lifecycle_lock.lock().await;
        self.close_locked(code, reason).await;
    }

    /// The body of [`Session::close`], split out so [`Session::resume`]'s
    /// `onlyIfAttached` failure path can close the session without
    /// re-entering `lifecycle_lock` (it's already held by the in-progress
    /// `resume()`).
    async fn close_locked(&self, code: u16, reason: &str) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.set_state(SessionState::Closing);
        let rpc = self.inner.rpc.lock().await.take();
        if let Some(rpc) = rpc {
            rpc.close(code, reason);
        }
        for entry in self.inner.cache.entries_in_order() {
            self.inner.cache.remove(entry.handle());
        }
        self.set_state(SessionState::Closed);
        self.inner.events.publish(SessionEvent::Closed { code, reason: reason.to_string() });
        info!(code, %reason, "session closed");
    }
}

/// The outcome of one `reattach` round trip for a single cached handle.
enum ReattachOutcome {
    /// Reattached; `new` may equal `old` (the handle survived unchanged)
    /// or differ (the server issued a fresh handle for the same object).
    Reattached { old: Handle, new: Handle },
    /// The server reported the object no longer exists.
    Lost(Handle),
}

impl ProxyHost for SessionInner {
    fn call<'a>(&'a self, handle: Handle, method: &'a str, params: Value) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            let state = SessionState::from_u8(self.state.load(Ordering::SeqCst));
            let draft = RequestDraft::new(method, handle, params);
            send_on(self, state, draft).await
        })
    }

    fn subscribe_cache_events(&self) -> Subscription<CacheEvent> {
        self.cache.events().subscribe()
    }
}

impl TransportObserver for SessionInner {
    /// Reacts to the socket closing on its own, as opposed to a
    /// deliberate `suspend()`/`close()`/`resume()` (which owns its own
    /// transition and marks the close as expected before it happens —
    /// see `Rpc::close`). `try_lock` rather than `.await` because this
    /// fires from the reader task as a plain callback: if a lifecycle
    /// call is already in flight it already owns whatever transition is
    /// happening, so this is a no-op.
    fn on_unsolicited_close(&self, code: u16, reason: String) {
        let Ok(_guard) = self.lifecycle_lock.try_lock() else {
            return;
        };
        if self.state.load(Ordering::SeqCst) != SessionState::Opened as u8 {
            return;
        }
        // A user-initiated close code terminates unconditionally, even
        // with `suspend_on_close` set — only a non-user close (a network
        // drop, or the server's own close) is eligible to become a
        // suspend.
        if self.config.suspend_on_close && code != USER_INITIATED_CLOSE_CODE {
            self.state.store(SessionState::Suspended as u8, Ordering::SeqCst);
            self.events.publish(SessionEvent::Suspended);
            info!(code, %reason, "socket closed unexpectedly, suspending");
        } else {
            self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
            for entry in self.cache.entries_in_order() {
                self.cache.remove(entry.handle());
            }
            self.events.publish(SessionEvent::Closed { code, reason: reason.clone() });
            warn!(code, %reason, "socket closed unexpectedly, closing session");
        }
    }

    fn on_socket_error(&self, message: String) {
        self.events.publish(SessionEvent::SocketError(message));
    }
}

/// The actual body of `send()`: takes a plain `&SessionInner` so both
/// [`Session::send`] and a live [`Proxy`]'s calls back through
/// [`ProxyHost`] share one implementation without either needing to
/// reconstruct an owning `Session`.
async fn send_on(inner: &SessionInner, state: SessionState, draft: RequestDraft) -> Result<Reply, Error> {
    match state {
        SessionState::Opened => {}
        SessionState::Suspended | SessionState::Suspending | SessionState::Resuming => {
            return Err(Error::State(StateError::Suspended))
        }
        SessionState::Closed | SessionState::Closing => return Err(Error::State(StateError::Closed)),
        SessionState::Created | SessionState::Opening => return Err(Error::State(StateError::NotConnected)),
    }

    let guard = inner.rpc.lock().await;
    let rpc = guard.as_ref().ok_or(Error::State(StateError::NotConnected))?;

    let id = rpc.allocate_id();
    let mut draft = draft;
    run_request_chain(&inner.config.request_interceptors, id, &mut draft).await?;
    let handle = draft.handle;

    let sent = rpc.send(id, draft).await?;
    drop(guard);

    let response = sent.await?;
    publish_side_bands(inner, &response.change, &response.close);
    let value = run_response_chain(&inner.config.response_interceptors, handle, response).await?;
    Ok(Reply { request_id: id, value })
}

fn publish_side_bands(inner: &SessionInner, change: &[Handle], close: &[Handle]) {
    for handle in change {
        inner.cache.notify_changed(*handle);
    }
    for handle in close {
        inner.cache.remove(*handle);
    }
}
