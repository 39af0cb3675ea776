//! # Downstream Routes
//!
//! - `GET /events`: Server-Sent Events stream of every message published after
//!   the request arrived.
//! - `GET /health`: liveness, always `{"status":"ok"}`.
//! - `GET /info`: JSON snapshot of hub and ingestion counters.
//! - `GET /static/*`: the browser client, when a static directory is
//!   configured. `GET /` redirects to its `index.html`.
//!
//! Each `/events` response body owns its [`Subscription`]. When the client goes
//! away hyper drops the body, the subscription is dropped with it and the
//! subscriber is unregistered. Nothing else has to watch for disconnects.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use bytes::Bytes;
use futures_util::{Stream, stream};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use lib_relay::configs::config_relay::MAX_KEEP_ALIVE_SECONDS;
use lib_relay::{IngestionSnapshot, SseEncoder, SubscriberStats, Subscription};

use crate::relay_logic::state::AppState;

/// Body of `GET /info`.
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub kafka_topic: String,
    pub subscribers: usize,
    pub published: u64,
    pub ingestion: IngestionSnapshot,
    pub subscriber_stats: Vec<SubscriberStats>,
}

/// Builds the relay router with a permissive CORS layer on every route.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let mut app = Router::new()
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .route("/info", get(info_handler));

    if let Some(dir) = &state.static_dir {
        app = app
            .nest_service("/static", ServeDir::new(dir))
            .route("/", get(|| async { Redirect::temporary("/static/index.html") }));
    }

    app.layer(cors).with_state(state)
}

/// # Event Stream Endpoint
///
/// Registers the subscriber before the response head is returned, so every
/// message published from this point on is buffered for it.
async fn events_handler(State(state): State<Arc<AppState>>) -> Response {
    let subscription = state.dispatcher.register();
    tracing::debug!(subscriber_id = %subscription.id(), "Opening event stream");

    let body = Body::from_stream(event_stream(subscription, state.encoder, state.keep_alive));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn info_handler(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let hub = state.dispatcher.stats();

    Json(InfoResponse {
        kafka_topic: state.kafka_topic.clone(),
        subscribers: hub.subscribers,
        published: hub.published,
        ingestion: state.ingestion.snapshot(),
        subscriber_stats: hub.subscriber_stats,
    })
}

/// Per-connection delivery state: the subscription, the encoder and the
/// keep-alive ticker.
struct Delivery {
    subscription: Subscription,
    encoder: SseEncoder,
    keep_alive: Option<Interval>,
}

impl Delivery {
    fn new(subscription: Subscription, encoder: SseEncoder, keep_alive: Option<Duration>) -> Self {
        // The ticker adds the period to `now` on every reset, so keep it bounded.
        let keep_alive = keep_alive
            .map(|period| period.min(Duration::from_secs(MAX_KEEP_ALIVE_SECONDS)))
            .and_then(|period| {
                let start = Instant::now().checked_add(period)?;
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(ticker)
            });

        Self {
            subscription,
            encoder,
            keep_alive,
        }
    }

    /// Waits for the next frame. `None` once the subscription is closed.
    async fn next_frame(&mut self) -> Option<Bytes> {
        let encoder = self.encoder;

        let Some(ticker) = self.keep_alive.as_mut() else {
            return self.subscription.pop().await.map(|m| encoder.encode(&m));
        };

        tokio::select! {
            message = self.subscription.pop() => {
                // Traffic keeps the connection alive; restart the idle timer.
                ticker.reset();
                message.map(|m| encoder.encode(&m))
            }
            _ = ticker.tick() => Some(encoder.keep_alive()),
        }
    }
}

/// The body stream of one `/events` response.
fn event_stream(
    subscription: Subscription,
    encoder: SseEncoder,
    keep_alive: Option<Duration>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold(Delivery::new(subscription, encoder, keep_alive), |mut delivery| async move {
        let frame = delivery.next_frame().await?;
        Some((Ok(frame), delivery))
    })
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use lib_relay::{Dispatcher, Message};
    use tokio::time::timeout;

    use super::*;

    fn text(frame: Option<Result<Bytes, Infallible>>) -> String {
        let bytes = frame.expect("stream ended").unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_stream_frames_messages_in_order() {
        let dispatcher = Arc::new(Dispatcher::new(8));
        let stream = event_stream(dispatcher.register(), SseEncoder, None);
        tokio::pin!(stream);

        dispatcher.publish(Message::new(1, "A"));
        dispatcher.publish(Message::new(2, "line\nbreak"));

        assert_eq!(text(stream.next().await), "data: A\n\n");
        assert_eq!(text(stream.next().await), "data: line\ndata: break\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_emits_keep_alive() {
        let dispatcher = Arc::new(Dispatcher::new(8));
        let stream = event_stream(dispatcher.register(), SseEncoder, Some(Duration::from_secs(15)));
        tokio::pin!(stream);

        let frame = timeout(Duration::from_secs(20), stream.next()).await.unwrap();
        assert_eq!(text(frame), ": keep-alive\n\n");

        dispatcher.publish(Message::new(1, "A"));
        assert_eq!(text(stream.next().await), "data: A\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_keep_alive_is_clamped() {
        let dispatcher = Arc::new(Dispatcher::new(8));
        let stream = event_stream(dispatcher.register(), SseEncoder, Some(Duration::from_secs(u64::MAX)));
        tokio::pin!(stream);

        dispatcher.publish(Message::new(1, "A"));
        assert_eq!(text(stream.next().await), "data: A\n\n");

        let frame = timeout(Duration::from_secs(MAX_KEEP_ALIVE_SECONDS + 1), stream.next())
            .await
            .unwrap();
        assert_eq!(text(frame), ": keep-alive\n\n");
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let dispatcher = Arc::new(Dispatcher::new(8));
        let stream = event_stream(dispatcher.register(), SseEncoder, Some(Duration::from_secs(15)));
        tokio::pin!(stream);

        dispatcher.shutdown();
        let end = timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters() {
        let dispatcher = Arc::new(Dispatcher::new(8));
        let stream = event_stream(dispatcher.register(), SseEncoder, None);
        assert_eq!(dispatcher.subscriber_count(), 1);

        drop(stream);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
