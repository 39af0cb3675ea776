//! # Ingestion Adapter
//!
//! Drives a [`MessageSource`] for the lifetime of the process and forwards every
//! decoded item to the dispatcher, in arrival order, without skipping or
//! reordering anything that decodes.
//!
//! ## Failure handling
//! - **Connection failures** (connect errors, broken sessions, end of stream)
//!   are logged and retried forever with exponential backoff plus jitter. The
//!   backoff resets after every successful connect.
//! - **Undecodable items** (missing payload, invalid UTF-8) are skipped and
//!   logged with their origin. They never stop the stream and do not consume a
//!   sequence number.
//!
//! Publishing is non-blocking, so nothing a subscriber does can slow this loop
//! or reach back into the source's acknowledgement path.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio_util::sync::CancellationToken;

use super::{IngestError, IngestionStats, MessageSource, RawItem, Sequencer};
use crate::core::dispatcher::Dispatcher;
use crate::core::message::Message;

/// Default lower bound for the reconnect delay.
pub const DEFAULT_RECONNECT_MIN_DELAY: Duration = Duration::from_millis(500);
/// Default upper bound for the reconnect delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Lost(IngestError),
}

/// # Ingestion Adapter
pub struct IngestionAdapter<S> {
    source: S,
    dispatcher: Arc<Dispatcher>,
    sequencer: Sequencer,
    stats: Arc<IngestionStats>,
    min_delay: Duration,
    max_delay: Duration,
}

impl<S: MessageSource> IngestionAdapter<S> {
    /// Creates an adapter with the default reconnect backoff.
    pub fn new(
        source: S,
        dispatcher: Arc<Dispatcher>,
        sequencer: Sequencer,
        stats: Arc<IngestionStats>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            sequencer,
            stats,
            min_delay: DEFAULT_RECONNECT_MIN_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
        }
    }

    /// Overrides the reconnect delay bounds.
    pub fn with_backoff(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay.max(min_delay);
        self
    }

    /// Shared counters for this adapter.
    pub fn stats(&self) -> Arc<IngestionStats> {
        Arc::clone(&self.stats)
    }

    /// # Run
    ///
    /// Connects, forwards, and reconnects until `shutdown` is cancelled. Does
    /// not return under normal operation.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut delays = reconnect_backoff(self.min_delay, self.max_delay).build();
        tracing::info!(source = %self.source.describe(), "Ingestion adapter started");

        loop {
            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(()) => {
                    delays = reconnect_backoff(self.min_delay, self.max_delay).build();
                    self.stats.set_connected(true);
                    tracing::info!(source = %self.source.describe(), "Ingestion source connected");

                    let end = self.pump(&shutdown).await;
                    self.stats.set_connected(false);

                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => {
                            tracing::warn!(source = %self.source.describe(), error = %e, "Ingestion source lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(source = %self.source.describe(), error = %e, "Failed to connect to ingestion source");
                }
            }

            let delay = delays.next().unwrap_or(self.max_delay);
            self.stats.record_reconnect();
            tracing::error!(backoff_ms = %delay.as_millis(), "Reconnecting to ingestion source after backoff");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.stats.set_connected(false);
        tracing::info!(source = %self.source.describe(), "Ingestion adapter stopped");
    }

    /// Forwards items from a connected source until it fails or shutdown.
    async fn pump(&mut self, shutdown: &CancellationToken) -> SessionEnd {
        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                item = self.source.recv() => item,
            };

            match item {
                Ok(raw) => {
                    self.forward(raw);
                }
                Err(e) => return SessionEnd::Lost(e),
            }
        }
    }

    /// Decodes one item and publishes it. Returns the assigned sequence, or
    /// `None` when the item was skipped.
    fn forward(&self, raw: RawItem) -> Option<u64> {
        let RawItem { payload, origin } = raw;

        let Some(bytes) = payload else {
            self.stats.record_decode_failure();
            tracing::warn!(origin = %origin, "Skipping item without payload");
            return None;
        };

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                self.stats.record_decode_failure();
                tracing::warn!(origin = %origin, error = %e, "Skipping item that is not valid UTF-8");
                return None;
            }
        };

        let sequence = self.sequencer.next_sequence();
        tracing::debug!(origin = %origin, sequence, "Received message");

        self.dispatcher.publish(Message::new(sequence, text));
        self.stats.record_forwarded();
        Some(sequence)
    }
}

/// Unbounded exponential backoff with jitter between `min_delay` and `max_delay`.
pub fn reconnect_backoff(min_delay: Duration, max_delay: Duration) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(min_delay)
        .with_max_delay(max_delay)
        .without_max_times()
        .with_jitter()
}
