//! # Broadcast Dispatcher
//!
//! The `Dispatcher` takes a single, ordered stream of messages from the
//! ingestion adapter and hands each one to every currently registered
//! subscriber.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: each message is wrapped in an `Arc` once. Every
//!     subscriber channel receives a pointer to the same allocation.
//!
//! 2.  **Publish never waits on a subscriber**: `publish` takes the registry lock
//!     only long enough to copy the list of channels, then pushes into each one
//!     with the channel's non-blocking, drop-oldest `push`. A stalled client can
//!     only lose its own messages.
//!
//! 3.  **Registration is visible before it returns**: `register` inserts into the
//!     registry under the same lock `publish` snapshots with, so any publish that
//!     starts after `register` returns includes the new subscriber, and none that
//!     snapshotted earlier can see it half-registered.
//!
//! 4.  **Serialized publishing**: a second lock orders concurrent `publish` calls
//!     end to end, so every subscriber sees the same relative order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

use crate::core::channel::{PushOutcome, SubscriberChannel};
use crate::core::message::{Message, SubscriberId, SubscriberStats};

/// Default per-subscriber buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// # Dispatcher Statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    /// Number of registered subscribers.
    pub subscribers: usize,
    /// Total number of `publish` calls.
    pub published: u64,
    /// Per-subscriber bookkeeping, ordered by id.
    pub subscriber_stats: Vec<SubscriberStats>,
}

/// # Core Dispatcher
///
/// Manages registration, unregistration and fan-out. Construct one per process,
/// wrap it in an `Arc` and share it between the ingestion task and the
/// transport layer.
pub struct Dispatcher {
    /// Active subscribers keyed by id. Guards registry mutations and the
    /// publish snapshot only.
    registry: Mutex<HashMap<SubscriberId, Arc<SubscriberChannel>>>,
    /// Orders whole `publish` calls against each other.
    publish_order: Mutex<()>,
    next_id: AtomicU64,
    published: AtomicU64,
    buffer_capacity: usize,
    shut_down: AtomicBool,
}

impl Dispatcher {
    /// Creates a dispatcher whose subscribers buffer up to `buffer_capacity`
    /// messages each.
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            publish_order: Mutex::new(()),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            buffer_capacity: buffer_capacity.max(1),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Per-subscriber buffer capacity.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<SubscriberChannel>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Register
    ///
    /// Creates an active subscriber with an empty channel and adds it to the
    /// registry. Every `publish` that starts after this returns will deliver to
    /// the returned [`Subscription`]. Dropping the subscription unregisters it.
    ///
    /// After [`shutdown`](Self::shutdown) the returned subscription is already
    /// closed and is not added to the registry.
    pub fn register(self: &Arc<Self>) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let channel = Arc::new(SubscriberChannel::new(id, self.buffer_capacity));

        {
            let mut registry = self.registry();
            if self.shut_down.load(Ordering::Acquire) {
                channel.close();
            } else {
                registry.insert(id, Arc::clone(&channel));
            }
        }

        tracing::info!(
            subscriber_id = %id,
            buffer_capacity = self.buffer_capacity,
            "Subscriber registered"
        );

        Subscription {
            id,
            channel,
            dispatcher: Arc::downgrade(self),
        }
    }

    /// # Unregister
    ///
    /// Removes the subscriber and closes its channel, waking any pending `pop`
    /// with the closed signal. Unknown or already removed ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        let removed = self.registry().remove(&id);

        if let Some(channel) = removed {
            channel.close();
            tracing::info!(
                subscriber_id = %id,
                dropped = channel.dropped_count(),
                "Subscriber unregistered"
            );
        }
    }

    /// # Publish
    ///
    /// Snapshots the registry, releases the registry lock, and pushes `message`
    /// into every snapshotted channel. Never blocks on a subscriber. Returns the
    /// number of subscribers the message was handed to.
    pub fn publish(&self, message: Message) -> usize {
        let message = Arc::new(message);
        let _order = self.publish_order.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot: Vec<Arc<SubscriberChannel>> = self.registry().values().cloned().collect();
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for channel in &snapshot {
            match channel.push(Arc::clone(&message)) {
                PushOutcome::Accepted | PushOutcome::DroppedOldest => delivered += 1,
                // Unregistered between the snapshot and the push.
                PushOutcome::Closed => {}
            }
        }

        tracing::trace!(
            sequence = message.sequence,
            subscribers = delivered,
            "Message published"
        );
        delivered
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    /// Total number of `publish` calls so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Point-in-time statistics for the dispatcher and each subscriber.
    pub fn stats(&self) -> DispatcherStats {
        let channels: Vec<Arc<SubscriberChannel>> = self.registry().values().cloned().collect();
        let mut subscriber_stats: Vec<SubscriberStats> =
            channels.iter().map(|channel| channel.stats()).collect();
        subscriber_stats.sort_by_key(|stats| stats.id);

        DispatcherStats {
            subscribers: subscriber_stats.len(),
            published: self.published_count(),
            subscriber_stats,
        }
    }

    /// # Shutdown
    ///
    /// Closes and removes every subscriber so all delivery tasks end, and makes
    /// later registrations start closed. Idempotent.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<SubscriberChannel>> = {
            let mut registry = self.registry();
            self.shut_down.store(true, Ordering::Release);
            registry.drain().map(|(_, channel)| channel).collect()
        };

        for channel in &drained {
            channel.close();
        }
        tracing::info!(closed = drained.len(), "Dispatcher shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

/// # Subscription Handle
///
/// Returned by [`Dispatcher::register`]. Owned by the subscriber's delivery
/// task; dropping it unregisters the subscriber.
pub struct Subscription {
    id: SubscriberId,
    channel: Arc<SubscriberChannel>,
    dispatcher: Weak<Dispatcher>,
}

impl Subscription {
    /// This subscriber's identifier.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next message, or `None` once unregistered or shut down.
    pub async fn pop(&self) -> Option<Arc<Message>> {
        self.channel.pop().await
    }

    /// Takes a buffered message without waiting.
    pub fn try_pop(&self) -> Option<Arc<Message>> {
        self.channel.try_pop()
    }

    /// Snapshot of this subscriber's bookkeeping.
    pub fn stats(&self) -> SubscriberStats {
        self.channel.stats()
    }

    /// Unregisters now instead of on drop.
    pub fn unregister(&self) {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.unregister(self.id),
            None => self.channel.close(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use tokio::time::timeout;

    use super::*;
    use crate::core::message::SubscriberState;

    async fn next_payload(sub: &Subscription) -> String {
        timeout(Duration::from_secs(1), sub.pop())
            .await
            .expect("timed out waiting for message")
            .expect("subscription closed")
            .payload
            .clone()
    }

    #[tokio::test]
    async fn test_subscriber_sees_every_publish_in_order() {
        let dispatcher = Arc::new(Dispatcher::new(64));
        let sub = dispatcher.register();

        for seq in 1..=50 {
            dispatcher.publish(Message::new(seq, format!("m{}", seq)));
        }

        let mut seen = Vec::new();
        while let Some(msg) = sub.try_pop() {
            seen.push(msg.sequence);
        }
        assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
        assert_eq!(sub.stats().dropped_count, 0);
    }

    #[tokio::test]
    async fn test_abc_scenario_single_subscriber() {
        let dispatcher = Arc::new(Dispatcher::default());
        let sub = dispatcher.register();

        for (seq, payload) in ["A", "B", "C"].iter().enumerate() {
            dispatcher.publish(Message::new(seq as u64 + 1, *payload));
        }

        assert_eq!(next_payload(&sub).await, "A");
        assert_eq!(next_payload(&sub).await, "B");
        assert_eq!(next_payload(&sub).await, "C");
        assert!(sub.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_late_subscriber_only_sees_later_messages() {
        let dispatcher = Arc::new(Dispatcher::default());
        let early = dispatcher.register();

        dispatcher.publish(Message::new(1, "A"));
        dispatcher.publish(Message::new(2, "B"));
        let late = dispatcher.register();
        dispatcher.publish(Message::new(3, "C"));

        assert_eq!(next_payload(&late).await, "C");
        assert!(late.try_pop().is_none());

        assert_eq!(next_payload(&early).await, "A");
        assert_eq!(next_payload(&early).await, "B");
        assert_eq!(next_payload(&early).await, "C");
    }

    #[tokio::test]
    async fn test_unregister_closes_and_is_idempotent() {
        let dispatcher = Arc::new(Dispatcher::default());
        let sub = dispatcher.register();
        let other = dispatcher.register();
        let id = sub.id();

        let pending = tokio::spawn(async move { sub.pop().await.is_none() });
        tokio::task::yield_now().await;

        dispatcher.unregister(id);
        dispatcher.unregister(id);
        assert!(timeout(Duration::from_secs(1), pending).await.unwrap().unwrap());

        assert_eq!(dispatcher.subscriber_count(), 1);
        assert_eq!(dispatcher.publish(Message::new(1, "after")), 1);
        assert_eq!(next_payload(&other).await, "after");
    }

    #[tokio::test]
    async fn test_drop_subscription_unregisters() {
        let dispatcher = Arc::new(Dispatcher::default());
        let sub = dispatcher.register();
        assert_eq!(dispatcher.subscriber_count(), 1);

        drop(sub);
        assert_eq!(dispatcher.subscriber_count(), 0);
        assert_eq!(dispatcher.publish(Message::new(1, "nobody")), 0);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_affect_others() {
        let dispatcher = Arc::new(Dispatcher::new(4));
        let stalled = dispatcher.register();
        let active = dispatcher.register();

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(msg) = active.pop().await {
                seen.push(msg.sequence);
                if msg.sequence == 200 {
                    break;
                }
            }
            seen
        });

        let started = Instant::now();
        for seq in 1..=200 {
            dispatcher.publish(Message::new(seq, "tick"));
            if seq % 4 == 0 {
                tokio::task::yield_now().await;
            }
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        let seen = timeout(Duration::from_secs(2), reader).await.unwrap().unwrap();
        assert_eq!(seen, (1..=200).collect::<Vec<u64>>());

        let stats = stalled.stats();
        assert_eq!(stats.buffered, 4);
        assert_eq!(stats.dropped_count, 196);
        assert_eq!(stalled.try_pop().unwrap().sequence, 197);
    }

    #[test]
    fn test_concurrent_register_never_misses_later_publish() {
        const REGISTRARS: usize = 16;
        const BACKGROUND: u64 = 2_000;

        let dispatcher = Arc::new(Dispatcher::new(8_192));
        let start = Arc::new(std::sync::Barrier::new(REGISTRARS + 1));

        let publisher = {
            let dispatcher = Arc::clone(&dispatcher);
            let start = Arc::clone(&start);
            std::thread::spawn(move || {
                start.wait();
                for seq in 1..=BACKGROUND {
                    dispatcher.publish(Message::new(seq, "bg"));
                }
            })
        };

        // Each registrar publishes its own marker right after `register`
        // returns; the subscription must contain it.
        let registrars: Vec<_> = (0..REGISTRARS)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                let start = Arc::clone(&start);
                std::thread::spawn(move || {
                    start.wait();
                    std::thread::sleep(Duration::from_micros(50 * i as u64));
                    let sub = dispatcher.register();
                    let marker = format!("marker-{}", i);
                    dispatcher.publish(Message::new(0, marker.clone()));
                    (sub, marker)
                })
            })
            .collect();

        let subs: Vec<_> = registrars.into_iter().map(|h| h.join().unwrap()).collect();
        publisher.join().unwrap();

        let streams: Vec<(String, Vec<String>)> = subs
            .iter()
            .map(|(sub, marker)| {
                let mut seen = Vec::new();
                while let Some(msg) = sub.try_pop() {
                    let label = if msg.payload == "bg" {
                        format!("bg-{}", msg.sequence)
                    } else {
                        msg.payload.clone()
                    };
                    seen.push(label);
                }
                (marker.clone(), seen)
            })
            .collect();

        for (marker, seen) in &streams {
            assert!(seen.contains(marker), "{} missing its own marker", marker);

            // Every background publish after registration was delivered: a
            // gap-free run ending at the last one.
            let background: Vec<u64> = seen
                .iter()
                .filter_map(|m| m.strip_prefix("bg-"))
                .map(|n| n.parse().unwrap())
                .collect();
            assert!(background.windows(2).all(|w| w[1] == w[0] + 1));
            if let Some(last) = background.last() {
                assert_eq!(*last, BACKGROUND);
            }
        }

        // Messages seen by two subscribers arrive in the same relative order.
        for (_, a) in &streams {
            for (_, b) in &streams {
                let in_b: std::collections::HashSet<&String> = b.iter().collect();
                let in_a: std::collections::HashSet<&String> = a.iter().collect();
                let a_common: Vec<&String> = a.iter().filter(|m| in_b.contains(m)).collect();
                let b_common: Vec<&String> = b.iter().filter(|m| in_a.contains(m)).collect();
                assert_eq!(a_common, b_common);
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_everyone() {
        let dispatcher = Arc::new(Dispatcher::default());
        let sub = dispatcher.register();
        dispatcher.publish(Message::new(1, "pending"));

        dispatcher.shutdown();
        assert!(sub.pop().await.is_none());
        assert_eq!(dispatcher.subscriber_count(), 0);

        let late = dispatcher.register();
        assert_eq!(late.stats().state, SubscriberState::Closed);
        assert_eq!(dispatcher.subscriber_count(), 0);
        assert_eq!(dispatcher.publish(Message::new(2, "ignored")), 0);
    }

    #[tokio::test]
    async fn test_stats_reports_subscribers() {
        let dispatcher = Arc::new(Dispatcher::new(2));
        let a = dispatcher.register();
        let _b = dispatcher.register();

        for seq in 1..=3 {
            dispatcher.publish(Message::new(seq, "s"));
        }
        a.try_pop();

        let stats = dispatcher.stats();
        assert_eq!(stats.subscribers, 2);
        assert_eq!(stats.published, 3);
        assert_eq!(stats.subscriber_stats[0].id, a.id());
        assert_eq!(stats.subscriber_stats[0].last_delivered_sequence, Some(2));
        assert_eq!(stats.subscriber_stats[1].dropped_count, 1);
    }
}
