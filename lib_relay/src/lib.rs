//! # lib_relay
//!
//! Broadcast relay core: one ordered ingestion stream in, many independent live
//! subscribers out. The crate is split the same way the data flows:
//!
//! - **`ingestors`**: the adapter that pulls items from an upstream source and
//!   turns each one into a [`Message`].
//! - **`core`**: the [`Dispatcher`] (subscriber registry and fan-out) and the
//!   per-subscriber bounded [`SubscriberChannel`].
//! - **`codec`**: the stream encoder that frames messages for the wire.
//! - **`configs`** / **`loggers`** (feature gated): process settings and
//!   tracing setup shared by the server binaries.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod codec;
pub mod core;
pub mod ingestors;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the types every consumer of the relay needs.
pub use crate::codec::sse::SseEncoder;
pub use crate::core::channel::{PushOutcome, SubscriberChannel};
pub use crate::core::dispatcher::{Dispatcher, DispatcherStats, Subscription};
pub use crate::core::message::{Message, SubscriberId, SubscriberState, SubscriberStats};
pub use crate::ingestors::{
    IngestError, IngestionAdapter, IngestionSnapshot, IngestionStats, KafkaConfig, MessageSource, RawItem,
    Sequencer,
};
