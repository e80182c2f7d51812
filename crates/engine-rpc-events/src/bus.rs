use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Default backlog kept for subscribers that lag behind a publisher.
///
/// A subscriber that falls more than this many messages behind loses the
/// oldest ones (`BroadcastStream` surfaces this as
/// `Err(BroadcastStreamRecvError::Lagged(n))`); callers that need every
/// message should drain their `Subscription` promptly.
pub const DEFAULT_CAPACITY: usize = 256;

/// A named, typed publish/subscribe channel.
///
/// `Bus<T>` is a first-class "channel as a value": rather than a Vec of
/// per-listener `mpsc::UnboundedSender`s (the shape used for notification
/// fan-out upstream), every subscriber gets
/// an independent receiver over the same underlying `tokio::sync::broadcast`
/// channel, and publishing is a single `send` regardless of how many
/// subscribers exist.
#[derive(Debug)]
pub struct Bus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Bus<T> {
    /// Creates a new bus with the default backlog capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a new bus with an explicit backlog capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes a value to every current subscriber.
    ///
    /// Returns the number of subscribers the value was delivered to. A
    /// return of `0` is not an error: nothing was listening, and the value
    /// is simply dropped, matching the at-most-once, fire-and-forget nature
    /// of the notifications this bus carries.
    pub fn publish(&self, value: T) -> usize {
        self.tx.send(value).unwrap_or(0)
    }

    /// Subscribes to future publications.
    ///
    /// The returned `Subscription` only observes values published after
    /// this call; it carries no history.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            inner: BroadcastStream::new(self.tx.subscribe()),
        }
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A stream of values published to a [`Bus`].
///
/// Wraps a `broadcast::Receiver` as a `futures_core::Stream` so callers can
/// `.next().await` it or fold it into a `select!` alongside other streams,
/// rather than hand-rolling a polling loop.
pub struct Subscription<T> {
    inner: BroadcastStream<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Awaits the next published value, silently skipping any that were
    /// dropped because this subscriber lagged behind the publisher.
    pub async fn recv(&mut self) -> Option<T> {
        use futures::StreamExt;

        loop {
            match self.inner.next().await {
                Some(Ok(value)) => return Some(value),
                Some(Err(_lagged)) => continue,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus: Bus<u32> = Bus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(7), 2);

        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let bus: Bus<u32> = Bus::new();
        assert_eq!(bus.publish(1), 0);
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_earlier_values() {
        let bus: Bus<u32> = Bus::new();
        bus.publish(1);
        let mut sub = bus.subscribe();
        bus.publish(2);
        assert_eq!(sub.recv().await, Some(2));
    }
}
