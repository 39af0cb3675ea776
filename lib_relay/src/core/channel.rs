//! # Subscriber Channel
//!
//! A bounded FIFO of `Arc<Message>` owned by exactly one subscriber. The
//! dispatcher is the only producer and the subscriber's delivery task is the
//! only consumer.
//!
//! ## Overflow Policy: drop oldest
//!
//! `push` never waits. When the buffer already holds `capacity` messages the
//! oldest buffered message is discarded to make room for the new one and
//! `dropped_count` is incremented. A slow subscriber therefore always sees the
//! freshest data it can keep up with, at the cost of gaps that are visible in
//! its statistics.
//!
//! ## Wake-ups
//!
//! A `tokio::sync::Notify` wakes the consumer. `notify_one` stores a permit when
//! nobody is waiting, so a push that lands between the consumer's emptiness
//! check and its `notified().await` is never lost.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::core::message::{Message, SubscriberId, SubscriberState, SubscriberStats};

/// Result of a non-blocking [`SubscriberChannel::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The message was buffered without displacing anything.
    Accepted,
    /// The message was buffered after the oldest buffered message was dropped.
    DroppedOldest,
    /// The channel is closed; the message was ignored.
    Closed,
}

struct ChannelState {
    buffer: VecDeque<Arc<Message>>,
    closed: bool,
    dropped: u64,
    last_delivered: Option<u64>,
}

/// # Subscriber Channel
///
/// See the module documentation for the overflow and wake-up contracts.
pub struct SubscriberChannel {
    id: SubscriberId,
    capacity: usize,
    state: Mutex<ChannelState>,
    notify: Notify,
}

impl SubscriberChannel {
    /// Creates an empty, open channel. A `capacity` of zero is raised to one.
    pub fn new(id: SubscriberId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id,
            capacity,
            state: Mutex::new(ChannelState {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
                last_delivered: None,
            }),
            notify: Notify::new(),
        }
    }

    /// The owning subscriber's identifier.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Maximum number of buffered messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // The guarded state is updated in single non-panicking steps, so a poisoned
    // lock still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Push
    ///
    /// Appends `message` without ever blocking the caller, applying the
    /// drop-oldest policy when full. No-op once the channel is closed.
    pub fn push(&self, message: Arc<Message>) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }

            let outcome = if state.buffer.len() >= self.capacity {
                if let Some(evicted) = state.buffer.pop_front() {
                    tracing::debug!(
                        subscriber_id = %self.id,
                        sequence = evicted.sequence,
                        "Buffer full, dropped oldest message"
                    );
                }
                state.dropped += 1;
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Accepted
            };

            state.buffer.push_back(message);
            outcome
        };

        self.notify.notify_one();
        outcome
    }

    /// # Pop
    ///
    /// Suspends until a message is available or the channel is closed.
    /// Returns messages in push order, then `None` once closed.
    pub async fn pop(&self) -> Option<Arc<Message>> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.buffer.pop_front() {
                    state.last_delivered = Some(message.sequence);
                    return Some(message);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Takes a buffered message if one is ready, without suspending.
    pub fn try_pop(&self) -> Option<Arc<Message>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let message = state.buffer.pop_front()?;
        state.last_delivered = Some(message.sequence);
        Some(message)
    }

    /// # Close
    ///
    /// Marks the channel closed, releases buffered messages and wakes a
    /// pending `pop`, which then returns `None`. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.buffer.clear();
        }
        self.notify.notify_one();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of messages dropped by the overflow policy.
    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }

    /// Number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// Snapshot of this channel's bookkeeping.
    pub fn stats(&self) -> SubscriberStats {
        let state = self.lock();
        SubscriberStats {
            id: self.id,
            state: if state.closed {
                SubscriberState::Closed
            } else {
                SubscriberState::Active
            },
            buffer_capacity: self.capacity,
            buffered: state.buffer.len(),
            dropped_count: state.dropped,
            last_delivered_sequence: state.last_delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn msg(sequence: u64) -> Arc<Message> {
        Arc::new(Message::new(sequence, format!("m{}", sequence)))
    }

    #[tokio::test]
    async fn test_pop_returns_push_order() {
        let channel = SubscriberChannel::new(SubscriberId(1), 8);
        for seq in 1..=3 {
            assert_eq!(channel.push(msg(seq)), PushOutcome::Accepted);
        }

        for seq in 1..=3 {
            assert_eq!(channel.pop().await.unwrap().sequence, seq);
        }
        assert_eq!(channel.stats().last_delivered_sequence, Some(3));
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let capacity = 4;
        let channel = SubscriberChannel::new(SubscriberId(1), capacity);

        for seq in 1..=capacity as u64 {
            assert_eq!(channel.push(msg(seq)), PushOutcome::Accepted);
        }
        assert_eq!(channel.push(msg(5)), PushOutcome::DroppedOldest);

        assert_eq!(channel.len(), capacity);
        assert_eq!(channel.dropped_count(), 1);

        let drained: Vec<u64> = std::iter::from_fn(|| channel.try_pop())
            .map(|m| m.sequence)
            .collect();
        assert_eq!(drained, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let channel = Arc::new(SubscriberChannel::new(SubscriberId(1), 2));
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.pop().await })
        };

        tokio::task::yield_now().await;
        channel.push(msg(42));

        let received = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("pop did not wake")
            .unwrap();
        assert_eq!(received.unwrap().sequence, 42);
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_pop() {
        let channel = Arc::new(SubscriberChannel::new(SubscriberId(1), 2));
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.pop().await })
        };

        tokio::task::yield_now().await;
        channel.close();

        let received = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("close did not wake pop")
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_push_after_close_is_noop() {
        let channel = SubscriberChannel::new(SubscriberId(1), 2);
        channel.push(msg(1));
        channel.close();
        channel.close();

        assert_eq!(channel.push(msg(2)), PushOutcome::Closed);
        assert!(channel.is_empty());
        assert!(channel.pop().await.is_none());
        assert_eq!(channel.stats().state, SubscriberState::Closed);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let channel = SubscriberChannel::new(SubscriberId(1), 0);
        assert_eq!(channel.capacity(), 1);
        assert_eq!(channel.push(msg(1)), PushOutcome::Accepted);
        assert_eq!(channel.push(msg(2)), PushOutcome::DroppedOldest);
        assert_eq!(channel.try_pop().unwrap().sequence, 2);
    }
}
