//! `/health`, `/info` and response headers of a relay with no live ingestion.

use std::time::Duration;

use lib_relay::Message;
use project_tests::{TEST_TOPIC, TestRelay};
use serde_json::{Value, json};

#[tokio::test]
async fn test_health_is_ok_without_ingestion() {
    let relay = TestRelay::start(16, None).await.unwrap();
    assert!(!relay.ingestion.is_connected());

    let response = reqwest::get(relay.url("/health")).await.unwrap();
    assert!(response.status().is_success());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_events_response_headers() {
    let relay = TestRelay::start(16, None).await.unwrap();

    let response = reqwest::get(relay.url("/events")).await.unwrap();
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
}

#[tokio::test]
async fn test_info_reports_hub_and_ingestion() {
    let relay = TestRelay::start(4, None).await.unwrap();
    let _reader = relay.subscribe().await;

    for seq in 1..=6 {
        relay.dispatcher.publish(Message::new(seq, format!("m{}", seq)));
    }

    let info: Value = reqwest::get(relay.url("/info")).await.unwrap().json().await.unwrap();

    assert_eq!(info["kafka_topic"], TEST_TOPIC);
    assert_eq!(info["subscribers"], 1);
    assert_eq!(info["published"], 6);
    assert_eq!(
        info["ingestion"],
        json!({ "connected": false, "reconnects": 0, "decode_failures": 0, "forwarded": 0 })
    );

    let stats = info["subscriber_stats"].as_array().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["state"], "active");
    assert_eq!(stats[0]["buffer_capacity"], 4);
    assert!(stats[0]["id"].is_u64());
}

#[tokio::test]
async fn test_idle_stream_gets_keep_alive_comments() {
    let relay = TestRelay::start(16, Some(Duration::from_millis(50))).await.unwrap();
    let mut reader = relay.subscribe().await;

    assert_eq!(reader.next_event_within(Duration::from_millis(300)).await, None);
    assert!(reader.comments >= 1);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let relay = TestRelay::start(16, None).await.unwrap();

    let response = reqwest::Client::new()
        .get(relay.url("/health"))
        .header("origin", "http://dashboard.example")
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_browser_client_is_served() {
    let relay = TestRelay::start(16, None).await.unwrap();

    let response = reqwest::get(relay.url("/static/app.js")).await.unwrap();
    assert!(response.status().is_success());
    let script = response.text().await.unwrap();
    assert!(script.contains("new EventSource('/events')"));
    assert!(script.contains("fetch('/info')"));

    let page = reqwest::get(relay.url("/")).await.unwrap();
    assert!(page.status().is_success());
    assert!(page.text().await.unwrap().contains("/static/app.js"));

    let missing = reqwest::get(relay.url("/static/nope.js")).await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}
