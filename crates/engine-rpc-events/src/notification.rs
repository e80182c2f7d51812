use std::collections::HashMap;
use std::sync::RwLock;

use crate::bus::{Bus, Subscription};
use crate::channel::ValidatedChannelString;

/// Fan-out for server notifications: each is delivered both on a
/// method-specific channel and on a wildcard channel carrying the method
/// name alongside the payload, matching the `notification:<method>` /
/// `notification:*` pair from the wire protocol.
pub struct NotificationBus<T> {
    wildcard: Bus<(String, T)>,
    typed: RwLock<HashMap<String, Bus<T>>>,
}

impl<T: Clone + Send + 'static> NotificationBus<T> {
    pub fn new() -> Self {
        Self {
            wildcard: Bus::new(),
            typed: RwLock::new(HashMap::new()),
        }
    }

    /// Publishes a notification for `method`, fanning it out to subscribers
    /// of `method` and to wildcard subscribers, in that order.
    ///
    /// A `method` that isn't a valid [`ValidatedChannelString`] (empty,
    /// non-ASCII, too long, or carrying punctuation outside the allowed
    /// set) still reaches wildcard subscribers — they get the raw method
    /// name regardless — but can never have had a typed subscriber, since
    /// [`Self::subscribe`] would have rejected it too.
    pub fn publish(&self, method: &str, payload: T) {
        if ValidatedChannelString::new(method).is_some() {
            if let Some(bus) = self.typed.read().expect("poisoned").get(method) {
                bus.publish(payload.clone());
            }
        }
        self.wildcard.publish((method.to_string(), payload));
    }

    /// Subscribes to notifications for one specific method.
    ///
    /// An invalid channel name (see [`ValidatedChannelString`]) still
    /// returns a `Subscription`, but one that will never yield anything —
    /// there's no way to name an invalid channel to publish on, so
    /// there's nothing useful to wait for.
    pub fn subscribe(&self, method: &str) -> Subscription<T> {
        if ValidatedChannelString::new(method).is_none() {
            return Bus::new().subscribe();
        }
        let mut typed = self.typed.write().expect("poisoned");
        typed
            .entry(method.to_string())
            .or_insert_with(Bus::new)
            .subscribe()
    }

    /// Subscribes to every notification, regardless of method.
    pub fn subscribe_all(&self) -> Subscription<(String, T)> {
        self.wildcard.subscribe()
    }
}

impl<T: Clone + Send + 'static> Default for NotificationBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn typed_and_wildcard_both_see_a_publish() {
        let bus: NotificationBus<u32> = NotificationBus::new();
        let mut typed = bus.subscribe("sheet-data");
        let mut wild = bus.subscribe_all();

        bus.publish("sheet-data", 42);

        assert_eq!(typed.recv().await, Some(42));
        assert_eq!(wild.recv().await, Some(("sheet-data".to_string(), 42)));
    }

    #[tokio::test]
    async fn subscriber_of_one_method_does_not_see_another() {
        let bus: NotificationBus<u32> = NotificationBus::new();
        let mut subscriber = bus.subscribe("onConnected");
        bus.publish("onDisconnected", 1);
        bus.publish("onConnected", 2);

        assert_eq!(subscriber.recv().await, Some(2));
    }
}
