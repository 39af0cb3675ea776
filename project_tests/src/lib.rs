//! Helpers for driving a relay end to end over a loopback socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lib_relay::{Dispatcher, IngestError, IngestionAdapter, IngestionStats, MessageSource, RawItem, Sequencer};
use servers::relay_logic::downstream;
use servers::relay_logic::state::AppState;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Topic name reported by test relays.
pub const TEST_TOPIC: &str = "test-prices";
/// The workspace's browser client.
pub const STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../static");

/// In-memory source fed through an mpsc channel. A closed channel ends the
/// session with `IngestError::Closed`.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    offset: u64,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn connect(&mut self) -> Result<(), IngestError> {
        Ok(())
    }

    async fn recv(&mut self) -> Result<RawItem, IngestError> {
        let payload = self.rx.recv().await.ok_or(IngestError::Closed)?;
        self.offset += 1;
        Ok(RawItem {
            payload: Some(payload),
            origin: format!("{}/0@{}", TEST_TOPIC, self.offset),
        })
    }

    fn describe(&self) -> String {
        format!("memory://{}", TEST_TOPIC)
    }
}

/// A relay serving on `127.0.0.1:<ephemeral>`.
pub struct TestRelay {
    pub base_url: String,
    pub dispatcher: Arc<Dispatcher>,
    pub ingestion: Arc<IngestionStats>,
    upstream: Option<mpsc::UnboundedSender<Vec<u8>>>,
    shutdown: CancellationToken,
}

impl TestRelay {
    /// Starts the router without any ingestion task.
    pub async fn start(buffer_capacity: usize, keep_alive: Option<Duration>) -> anyhow::Result<Self> {
        let dispatcher = Arc::new(Dispatcher::new(buffer_capacity));
        let ingestion = Arc::new(IngestionStats::default());
        let shutdown = CancellationToken::new();

        let state = AppState::new(Arc::clone(&dispatcher), Arc::clone(&ingestion), TEST_TOPIC)
            .with_keep_alive(keep_alive)
            .with_static_dir(STATIC_DIR);
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let token = shutdown.clone();
        let app = downstream::router(Arc::new(state));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
        });

        Ok(Self {
            base_url,
            dispatcher,
            ingestion,
            upstream: None,
            shutdown,
        })
    }

    /// Starts the router plus an ingestion adapter over a [`ChannelSource`].
    pub async fn start_with_ingestion(buffer_capacity: usize, keep_alive: Option<Duration>) -> anyhow::Result<Self> {
        let mut relay = Self::start(buffer_capacity, keep_alive).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut adapter = IngestionAdapter::new(
            ChannelSource { rx, offset: 0 },
            Arc::clone(&relay.dispatcher),
            Sequencer::new(),
            Arc::clone(&relay.ingestion),
        );
        let token = relay.shutdown.clone();
        tokio::spawn(async move { adapter.run(token).await });

        relay.upstream = Some(tx);
        relay.wait_until(|r| r.ingestion.is_connected()).await;
        Ok(relay)
    }

    /// Feeds one raw item into the ingestion source.
    pub fn send_upstream(&self, payload: impl Into<Vec<u8>>) {
        if let Some(tx) = &self.upstream {
            tx.send(payload.into()).expect("ingestion adapter is running");
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Opens an event stream and waits until the relay has registered it.
    pub async fn subscribe(&self) -> SseReader {
        let expected = self.dispatcher.subscriber_count() + 1;
        let response = reqwest::get(self.url("/events")).await.expect("GET /events");
        assert!(response.status().is_success());
        self.wait_for_subscribers(expected).await;
        SseReader::new(response)
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        self.wait_until(|r| r.dispatcher.subscriber_count() == count).await;
    }

    /// Polls `condition` every 10ms for up to 5s.
    pub async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        for _ in 0..500 {
            if condition(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 5s");
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.dispatcher.shutdown();
    }
}

/// Minimal SSE client over a streaming `reqwest` response.
pub struct SseReader {
    response: reqwest::Response,
    buffer: Vec<u8>,
    /// Comment frames seen so far.
    pub comments: usize,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: Vec::new(),
            comments: 0,
        }
    }

    /// The next event's data (multiple `data:` fields joined with `\n`), or
    /// `None` when the stream ends. Comment frames are counted and skipped.
    pub async fn next_event(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
                let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
                let frame = String::from_utf8(raw).expect("frames are UTF-8");
                let data: Vec<&str> = frame
                    .lines()
                    .filter_map(|line| line.strip_prefix("data: "))
                    .collect();

                if data.is_empty() {
                    self.comments += 1;
                    continue;
                }
                return Some(data.join("\n"));
            }

            let chunk = self.response.chunk().await.ok()??;
            self.buffer.extend_from_slice(&chunk);
        }
    }

    /// [`next_event`](Self::next_event) bounded by `limit`.
    pub async fn next_event_within(&mut self, limit: Duration) -> Option<String> {
        tokio::time::timeout(limit, self.next_event()).await.ok().flatten()
    }
}
