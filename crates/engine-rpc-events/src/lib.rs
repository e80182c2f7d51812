#![forbid(unsafe_code)]
//! Typed publish/subscribe primitives used for notification and handle
//! change/close fan-out in `engine-rpc`.
//!
//! This crate is intentionally **not** a general event-sourcing substrate.
//! It provides:
//! - [`Bus`], a named, typed broadcast channel with independent subscribers.
//! - [`NotificationBus`], the method-keyed + wildcard fan-out pattern used
//!   for server notifications.
//! - [`ValidatedChannelString`], a small validated label used when a channel
//!   needs a stable, loggable name.

mod bus;
mod channel;
mod notification;

pub use bus::{Bus, Subscription};
pub use channel::ValidatedChannelString;
pub use notification::NotificationBus;
