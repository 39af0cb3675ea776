//! # Data Ingestors Module
//!
//! The "front door" for upstream data. A [`MessageSource`] hides the protocol of
//! the upstream system behind `connect`/`recv`; the [`IngestionAdapter`] drives a
//! source, turns every item into a [`Message`](crate::core::Message) and hands it
//! to the [`Dispatcher`](crate::core::Dispatcher) in arrival order.
//!
//! ## Contained Modules:
//! - **`adapter`**: the long-running forwarding loop with reconnect backoff and
//!   the skip-and-log decode policy.
//! - **`kafka`**: connection settings, plus (feature `kafka`) an `rdkafka`
//!   consumer over SSL.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// The forwarding loop.
pub mod adapter;
/// Kafka connection settings and the Kafka ingestion source.
pub mod kafka;

pub use adapter::IngestionAdapter;
pub use kafka::KafkaConfig;
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;

/// Errors raised by an ingestion source. All of them are recoverable: the
/// adapter logs them and reconnects with backoff.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The upstream could not be reached or the session broke.
    #[error("connection to ingestion source failed: {0}")]
    Connection(String),

    /// Subscribing to the upstream topic failed.
    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    /// The upstream ended the stream.
    #[error("ingestion source closed the stream")]
    Closed,
}

/// One undecoded item as delivered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    /// Raw payload bytes; `None` for items that carry no value.
    pub payload: Option<Vec<u8>>,
    /// Human readable position of the item upstream, used in logs.
    pub origin: String,
}

impl RawItem {
    /// Creates an item with a payload.
    pub fn new(payload: impl Into<Vec<u8>>, origin: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            origin: origin.into(),
        }
    }
}

/// # Message Source
///
/// The seam between an upstream system and the ingestion adapter. `connect` is
/// called again after every failure, so implementations must tolerate being
/// reconnected.
#[async_trait]
pub trait MessageSource: Send {
    /// Establishes (or re-establishes) the upstream session.
    async fn connect(&mut self) -> Result<(), IngestError>;

    /// Waits for the next item, in upstream order.
    async fn recv(&mut self) -> Result<RawItem, IngestError>;

    /// Short description of the upstream for log lines.
    fn describe(&self) -> String;
}

/// Shared, monotonically increasing sequence generator starting at 1. Clones
/// share the counter, so sequences survive adapter restarts.
#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    last: Arc<AtomicU64>,
}

impl Sequencer {
    /// Creates a generator whose first value is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The most recently issued sequence number, 0 if none.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

/// # Ingestion Statistics
///
/// Lock-free counters shared between the adapter and whoever reports on it.
#[derive(Debug, Default)]
pub struct IngestionStats {
    connected: AtomicBool,
    reconnects: AtomicU64,
    decode_failures: AtomicU64,
    forwarded: AtomicU64,
}

/// Serializable copy of [`IngestionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestionSnapshot {
    pub connected: bool,
    pub reconnects: u64,
    pub decode_failures: u64,
    pub forwarded: u64,
}

impl IngestionStats {
    /// Marks the source connected or disconnected. The adapter maintains this
    /// itself; supervisors reset it after an adapter task dies mid-session.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the source is currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Current values of all counters.
    pub fn snapshot(&self) -> IngestionSnapshot {
        IngestionSnapshot {
            connected: self.is_connected(),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }
}
