use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Weak;

use serde_json::Value;

use crate::cache::{CacheEvent, HandleSlot};
use crate::error::{Error, StateError};
use crate::handle::Handle;
use crate::msgs::Reply;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One method a generated proxy can invoke, as described by a
/// [`ProxyFactory`].
#[derive(Debug, Clone)]
pub struct MethodStub {
    pub name: String,
    /// If set, a successful call returns a new handle of this type rather
    /// than a plain value, so the proxy layer knows to wrap the result in
    /// another [`Proxy`] instead of handing back raw JSON.
    pub returns_handle_of_type: Option<String>,
}

/// The methods available on one server object type, as produced by a
/// [`ProxyFactory`] for a given type name.
#[derive(Debug, Clone, Default)]
pub struct MethodSet {
    pub type_name: String,
    pub methods: HashMap<String, MethodStub>,
}

impl MethodSet {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), methods: HashMap::new() }
    }

    pub fn with_method(mut self, stub: MethodStub) -> Self {
        self.methods.insert(stub.name.clone(), stub);
        self
    }
}

/// Maps a server object's type name to the set of methods a proxy for it
/// should expose.
///
/// Implementations are expected to be pure and side-effect free — given
/// the same type name, `generate` should always describe the same
/// methods. Schema-driven generation (deriving a `MethodSet` from a
/// server-provided IDL) is a valid implementation but lives outside this
/// crate; what's here is the seam it plugs into.
pub trait ProxyFactory: Send + Sync {
    fn generate(&self, type_name: &str) -> MethodSet;
}

/// The fallback factory: every method call is accepted and forwarded
/// as-is, with no static knowledge of what a type supports.
///
/// Used when a caller hasn't supplied a schema-aware factory. A dynamic
/// proxy still enforces the handle/cache invariants; it just can't reject
/// a typo'd method name before the round trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicProxyFactory;

impl ProxyFactory for DynamicProxyFactory {
    fn generate(&self, type_name: &str) -> MethodSet {
        MethodSet::new(type_name)
    }
}

/// The narrow surface a [`Proxy`] needs from its owning session: enough
/// to make calls and watch for cache events, nothing that would force
/// `proxy` to depend on `session`'s concrete types.
pub trait ProxyHost: Send + Sync {
    fn call<'a>(&'a self, handle: Handle, method: &'a str, params: Value) -> BoxFuture<'a, Result<Reply, Error>>;
    fn subscribe_cache_events(&self) -> engine_rpc_events::Subscription<CacheEvent>;
}

/// A handle to a server-side object, generated from a [`MethodSet`].
///
/// Holds a [`HandleSlot`] rather than a plain [`Handle`] and a weak
/// reference to its session: a live `Proxy` never keeps a session alive
/// on its own, and never keeps the session's API cache alive either,
/// since the cache is what owns `Proxy`-adjacent bookkeeping in the
/// first place. This is what breaks the session → cache → proxy →
/// session reference cycle. Sharing the slot with the [`crate::cache::CacheEntry`]
/// it was built from is what lets `resume()` rewrite which server handle
/// this proxy answers to without handing the caller a new `Proxy`.
pub struct Proxy {
    slot: HandleSlot,
    methods: MethodSet,
    host: Weak<dyn ProxyHost>,
}

impl Proxy {
    pub fn new(slot: HandleSlot, methods: MethodSet, host: Weak<dyn ProxyHost>) -> Self {
        Self { slot, methods, host }
    }

    pub fn handle(&self) -> Handle {
        Handle(self.slot.load(Ordering::SeqCst))
    }

    pub fn type_name(&self) -> &str {
        &self.methods.type_name
    }

    pub fn methods(&self) -> &MethodSet {
        &self.methods
    }

    /// Invokes `method` with `params` against this proxy's current
    /// handle.
    ///
    /// Fails with [`StateError::Closed`] if the owning session has
    /// already been dropped — a dangling proxy behaves like a session
    /// that's permanently closed rather than panicking.
    pub async fn call(&self, method: &str, params: Value) -> Result<Reply, Error> {
        let host = self
            .host
            .upgrade()
            .ok_or(Error::State(StateError::Closed))?;
        host.call(self.handle(), method, params).await
    }

    /// Subscribes to cache events for this proxy's handle, filtering out
    /// events for every other handle the session has cached.
    pub fn changes(&self) -> Option<ProxyChangeStream> {
        let host = self.host.upgrade()?;
        Some(ProxyChangeStream {
            slot: self.slot.clone(),
            inner: host.subscribe_cache_events(),
        })
    }
}

/// A [`Proxy`]'s own view of [`CacheEvent`]s: the underlying bus carries
/// events for every cached handle, this filters to just this proxy's
/// current one (which may move across a `resume()`).
pub struct ProxyChangeStream {
    slot: HandleSlot,
    inner: engine_rpc_events::Subscription<CacheEvent>,
}

impl ProxyChangeStream {
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            let current = Handle(self.slot.load(Ordering::SeqCst));
            match self.inner.recv().await {
                Some(event) if event_handle(&event) == current => return Some(event),
                Some(_) => continue,
                None => return None,
            }
        }
    }
}

fn event_handle(event: &CacheEvent) -> Handle {
    match event {
        CacheEvent::Changed { handle, .. } => *handle,
        CacheEvent::Closed { handle } => *handle,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dynamic_factory_accepts_any_type_name() {
        let factory = DynamicProxyFactory;
        let set = factory.generate("Sheet");
        assert_eq!(set.type_name, "Sheet");
        assert!(set.methods.is_empty());
    }

    #[test]
    fn method_set_builder_retains_stubs_by_name() {
        let set = MethodSet::new("Sheet").with_method(MethodStub {
            name: "getCell".to_string(),
            returns_handle_of_type: None,
        });
        assert!(set.methods.contains_key("getCell"));
    }
}
