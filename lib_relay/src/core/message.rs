//! # Relay Message and Subscriber Types
//!
//! `Message` is the unit that flows from ingestion to every subscriber. It is
//! created once per upstream item and then only ever handed around as
//! `Arc<Message>`, so a fan-out to N subscribers costs N pointer clones and no
//! payload copies. The allocation is reclaimed when the last channel holding it
//! drains or drops it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// # Relay Message
///
/// An immutable item received from the ingestion source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Monotonically increasing position in the global publish order.
    pub sequence: u64,
    /// The decoded UTF-8 payload, exactly as received.
    pub payload: String,
    /// Wall-clock time at which the ingestion adapter accepted the item.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(sequence: u64, payload: impl Into<String>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Unique identifier handed out by the dispatcher on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Lifecycle state of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberState {
    /// Registered and receiving messages.
    Active,
    /// Unregistered or shut down; no further messages are delivered.
    Closed,
}

/// # Subscriber Statistics
///
/// Point-in-time view of one subscriber's delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberStats {
    /// Identifier assigned at registration.
    pub id: SubscriberId,
    /// Whether the subscriber is still receiving.
    pub state: SubscriberState,
    /// Maximum number of messages held before the oldest is dropped.
    pub buffer_capacity: usize,
    /// Messages currently waiting in the buffer.
    pub buffered: usize,
    /// Messages discarded by the overflow policy since registration.
    pub dropped_count: u64,
    /// Sequence of the last message handed to the delivery task, if any.
    pub last_delivered_sequence: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_keeps_payload_verbatim() {
        let msg = Message::new(7, "line one\nline two");
        assert_eq!(msg.sequence, 7);
        assert_eq!(msg.payload, "line one\nline two");
        assert!(msg.received_at <= Utc::now());
    }

    #[test]
    fn test_subscriber_stats_serialize_shape() {
        let stats = SubscriberStats {
            id: SubscriberId(3),
            state: SubscriberState::Active,
            buffer_capacity: 8,
            buffered: 2,
            dropped_count: 1,
            last_delivered_sequence: None,
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["state"], "active");
        assert_eq!(json["dropped_count"], 1);
        assert!(json["last_delivered_sequence"].is_null());
        assert_eq!(SubscriberId(3).to_string(), "sub-3");
    }
}
