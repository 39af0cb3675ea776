//! # Upstream Supervision
//!
//! Keeps an [`IngestionAdapter`] running for the lifetime of the process. The
//! adapter already reconnects on its own; the supervisor covers the cases it
//! cannot: a panic inside the task, or a return before shutdown. Either is
//! logged at error level and a fresh adapter (with a fresh source) is started
//! after a backoff delay. The [`Sequencer`] is shared across restarts, so
//! sequence numbers keep increasing.

use std::sync::Arc;

use backon::BackoffBuilder;
use tokio_util::sync::CancellationToken;

use lib_relay::configs::ReconnectSettings;
use lib_relay::ingestors::adapter::reconnect_backoff;
use lib_relay::{Dispatcher, IngestionAdapter, IngestionStats, MessageSource, Sequencer};

/// # Ingestion Supervisor
pub struct IngestionSupervisor {
    dispatcher: Arc<Dispatcher>,
    sequencer: Sequencer,
    stats: Arc<IngestionStats>,
    reconnect: ReconnectSettings,
}

impl IngestionSupervisor {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sequencer: Sequencer,
        stats: Arc<IngestionStats>,
        reconnect: ReconnectSettings,
    ) -> Self {
        Self {
            dispatcher,
            sequencer,
            stats,
            reconnect,
        }
    }

    /// # Run
    ///
    /// Spawns an adapter over `make_source()` and restarts it whenever the task
    /// ends before `shutdown` is cancelled. Returns after shutdown once the
    /// current adapter has stopped.
    pub async fn run<S, F>(self, mut make_source: F, shutdown: CancellationToken)
    where
        S: MessageSource + 'static,
        F: FnMut() -> S,
    {
        let ReconnectSettings { min_delay, max_delay } = self.reconnect;
        let mut restarts = reconnect_backoff(min_delay, max_delay).build();

        while !shutdown.is_cancelled() {
            let mut adapter = IngestionAdapter::new(
                make_source(),
                Arc::clone(&self.dispatcher),
                self.sequencer.clone(),
                Arc::clone(&self.stats),
            )
            .with_backoff(min_delay, max_delay);

            let token = shutdown.clone();
            let outcome = tokio::spawn(async move { adapter.run(token).await }).await;

            if shutdown.is_cancelled() {
                break;
            }

            // The dead task may have been mid-session.
            self.stats.set_connected(false);
            match outcome {
                Ok(()) => tracing::error!("Ingestion adapter exited before shutdown"),
                Err(e) if e.is_panic() => tracing::error!(error = %e, "Ingestion adapter panicked"),
                Err(e) => tracing::error!(error = %e, "Ingestion adapter task failed"),
            }

            let delay = restarts.next().unwrap_or(max_delay);
            tracing::error!(backoff_ms = %delay.as_millis(), "Restarting ingestion adapter after backoff");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(last_sequence = self.sequencer.last(), "Ingestion supervisor stopped");
    }
}
