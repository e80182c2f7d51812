use std::sync::Arc;
use std::time::Duration;

use crate::interceptor::{default_response_chain, DefaultDeltaRequestInterceptor, RequestInterceptor, ResponseInterceptor};
use crate::proxy::{DynamicProxyFactory, ProxyFactory};
use crate::socket::SocketFactory;

/// Policy governing how `resume()` reconciles the cached proxies of a
/// suspended session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReattachPolicy {
    /// Every cached handle must reattach successfully or `resume()` fails
    /// as a whole and the session moves to `CLOSED` rather than `OPENED`.
    OnlyIfAttached,
    /// Handles that fail to reattach are dropped from the cache and
    /// reported, but `resume()` still succeeds for the rest.
    BestEffort,
}

/// Immutable configuration for a [`crate::session::Session`], built via
/// [`SessionConfigBuilder`].
pub struct SessionConfig {
    pub url: String,
    pub socket_factory: SocketFactory,
    pub default_delta: bool,
    pub reattach_policy: ReattachPolicy,
    pub open_timeout: Duration,
    pub request_interceptors: Vec<Box<dyn RequestInterceptor>>,
    pub response_interceptors: Vec<Box<dyn ResponseInterceptor>>,
    pub proxy_factory: Arc<dyn ProxyFactory>,
    /// When true, an unsolicited socket close (server-initiated or a
    /// network drop, as opposed to a caller calling `close()` with the
    /// user-initiated code) transitions the session to `Suspended`
    /// instead of `Closed`. Defaults to `false`.
    pub suspend_on_close: bool,
}

/// Builds a [`SessionConfig`].
///
/// Mirrors the consuming, self-returning builder shape used throughout
/// this codebase: every setter takes and returns `Self` so calls chain,
/// and `build()` is the only way to materialize a [`SessionConfig`].
pub struct SessionConfigBuilder {
    url: String,
    socket_factory: Option<SocketFactory>,
    default_delta: bool,
    reattach_policy: ReattachPolicy,
    open_timeout: Duration,
    request_interceptors: Vec<Box<dyn RequestInterceptor>>,
    response_interceptors: Option<Vec<Box<dyn ResponseInterceptor>>>,
    proxy_factory: Option<Arc<dyn ProxyFactory>>,
    suspend_on_close: bool,
}

impl SessionConfigBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket_factory: None,
            default_delta: true,
            reattach_policy: ReattachPolicy::BestEffort,
            open_timeout: Duration::from_secs(10),
            request_interceptors: Vec::new(),
            response_interceptors: None,
            proxy_factory: None,
            suspend_on_close: false,
        }
    }

    /// Sets the factory used to open (and reopen, on `resume()`) the
    /// underlying socket. Required — [`Self::build`] fails without one.
    pub fn socket_factory(mut self, factory: SocketFactory) -> Self {
        self.socket_factory = Some(factory);
        self
    }

    /// Sets the protocol-level default for the `delta` flag on outgoing
    /// requests. Defaults to `true`. A caller's explicit `delta: false`
    /// on a given request always overrides this.
    pub fn default_delta(mut self, default_delta: bool) -> Self {
        self.default_delta = default_delta;
        self
    }

    /// Sets how `resume()` treats handles that fail to reattach. Defaults
    /// to [`ReattachPolicy::BestEffort`].
    pub fn reattach_policy(mut self, policy: ReattachPolicy) -> Self {
        self.reattach_policy = policy;
        self
    }

    /// Sets how long `open()`/`resume()` wait for the socket to connect
    /// before failing. Defaults to 10 seconds.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Appends a request interceptor to the end of the chain. Interceptors
    /// run in the order they're added, after the built-in delta-default
    /// interceptor.
    pub fn add_request_interceptor(mut self, interceptor: Box<dyn RequestInterceptor>) -> Self {
        self.request_interceptors.push(interceptor);
        self
    }

    /// Replaces the entire response interceptor chain, including the
    /// built-in one. Most callers should prefer leaving this unset and
    /// using [`Self::add_request_interceptor`] for request-side additions
    /// — this exists for callers who need to remove or reorder a default
    /// step.
    pub fn response_interceptors(mut self, chain: Vec<Box<dyn ResponseInterceptor>>) -> Self {
        self.response_interceptors = Some(chain);
        self
    }

    /// Sets the factory used to generate a [`crate::proxy::MethodSet`] for
    /// a given server object type. Defaults to
    /// [`DynamicProxyFactory`].
    pub fn proxy_factory(mut self, factory: Arc<dyn ProxyFactory>) -> Self {
        self.proxy_factory = Some(factory);
        self
    }

    /// Sets whether an unsolicited socket close is treated as a suspend
    /// rather than a hard close. Defaults to `false`.
    pub fn suspend_on_close(mut self, suspend_on_close: bool) -> Self {
        self.suspend_on_close = suspend_on_close;
        self
    }

    pub fn build(self) -> Result<SessionConfig, crate::error::Error> {
        let socket_factory = self.socket_factory.ok_or_else(|| {
            crate::error::Error::Transport(crate::error::TransportError::Open {
                url: self.url.clone(),
                reason: "no socket factory configured".to_string(),
            })
        })?;

        let mut request_interceptors: Vec<Box<dyn RequestInterceptor>> =
            vec![Box::new(DefaultDeltaRequestInterceptor { default_delta: self.default_delta })];
        request_interceptors.extend(self.request_interceptors);

        Ok(SessionConfig {
            url: self.url,
            socket_factory,
            default_delta: self.default_delta,
            reattach_policy: self.reattach_policy,
            open_timeout: self.open_timeout,
            request_interceptors,
            response_interceptors: self.response_interceptors.unwrap_or_else(default_response_chain),
            proxy_factory: self.proxy_factory.unwrap_or_else(|| Arc::new(DynamicProxyFactory)),
            suspend_on_close: self.suspend_on_close,
        })
    }
}
