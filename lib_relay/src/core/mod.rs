//! # Core Relay Module
//!
//! The concurrency-bearing heart of the relay. Everything a published message
//! touches between the ingestion task and a subscriber's delivery task lives here.
//!
//! ## Core Components:
//!
//! - **`message`**: the immutable [`Message`](message::Message) unit, shared by
//!   reference count across every channel holding it, plus the subscriber
//!   bookkeeping types.
//!
//! - **`channel`**: a bounded FIFO per subscriber. `push` never blocks and drops
//!   the oldest buffered message on overflow; `pop` suspends until data arrives
//!   or the channel is closed.
//!
//! - **`dispatcher`**: the registry of active subscribers. `publish` snapshots
//!   the registry under its lock and pushes to every snapshotted channel after
//!   releasing it.

/// Bounded per-subscriber FIFO with a drop-oldest overflow policy.
pub mod channel;
/// Subscriber registry and non-blocking fan-out.
pub mod dispatcher;
/// The shared message unit and subscriber bookkeeping types.
pub mod message;

pub use channel::{PushOutcome, SubscriberChannel};
pub use dispatcher::{Dispatcher, DispatcherStats, Subscription};
pub use message::{Message, SubscriberId, SubscriberState, SubscriberStats};
