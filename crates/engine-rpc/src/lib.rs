#![forbid(unsafe_code)]
//! Client core for a JSON-RPC-over-WebSocket protocol used to drive a
//! stateful analytics engine: open a session, call methods against
//! handle-addressed server objects, and keep going across a suspended
//! connection.
//!
//! The pieces:
//! - [`session`] ties everything together: the [`session::Session`]
//!   handle callers hold, and the suspend/resume state machine.
//! - [`rpc`] is the raw request/response layer: one [`rpc::Rpc`] per live
//!   socket, replaced wholesale across a resume.
//! - [`cache`] and [`proxy`] implement the handle -> server-object
//!   mapping and the at-most-one-proxy-per-handle rule.
//! - [`interceptor`] is the request/response middleware chain — delta
//!   defaulting on the way out, delta merging and error mapping on the
//!   way back.
//! - [`socket`] is the transport seam this crate never implements itself.

pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod interceptor;
pub mod msgs;
pub mod proxy;
pub mod rpc;
pub mod session;
pub mod socket;

#[cfg(test)]
mod test_support;

pub use cache::{ApiCache, CacheEntry, CacheEvent, HandleSlot};
pub use config::{ReattachPolicy, SessionConfig, SessionConfigBuilder};
pub use error::{DecodeError, Error, StateError, TransportError};
pub use handle::Handle;
pub use msgs::{Notification, Reply, Request, RequestDraft, RequestId, Response};
pub use proxy::{DynamicProxyFactory, MethodSet, MethodStub, Proxy, ProxyFactory};
pub use rpc::{Rpc, SentRequest, TransportObserver};
pub use session::{Session, SessionEvent, SessionState};
pub use socket::{Socket, SocketEvent, SocketFactory};
