//! Shared state handed to every route of the relay router.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lib_relay::configs::config_relay::DEFAULT_KEEP_ALIVE_SECONDS;
use lib_relay::{Dispatcher, IngestionStats, SseEncoder};

/// # Application State
///
/// Everything the routes need. Wrapped in an `Arc` and shared by all handlers.
pub struct AppState {
    /// Subscriber registry and fan-out.
    pub dispatcher: Arc<Dispatcher>,
    /// Counters of the ingestion adapter, reported by `/info`.
    pub ingestion: Arc<IngestionStats>,
    /// Topic being relayed, reported by `/info`.
    pub kafka_topic: String,
    /// Frames messages for every `/events` body.
    pub encoder: SseEncoder,
    /// Interval between keep-alive frames on an idle stream. `None` disables them.
    pub keep_alive: Option<Duration>,
    /// Browser client served under `/static`. `None` serves no assets.
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    /// State with the default keep-alive interval and no static assets.
    pub fn new(dispatcher: Arc<Dispatcher>, ingestion: Arc<IngestionStats>, kafka_topic: impl Into<String>) -> Self {
        Self {
            dispatcher,
            ingestion,
            kafka_topic: kafka_topic.into(),
            encoder: SseEncoder,
            keep_alive: Some(Duration::from_secs(DEFAULT_KEEP_ALIVE_SECONDS)),
            static_dir: None,
        }
    }

    /// Overrides the keep-alive interval; `None` disables keep-alive frames.
    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Serves the browser client from `dir` under `/static`, with `/`
    /// redirecting to its `index.html`.
    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }
}
