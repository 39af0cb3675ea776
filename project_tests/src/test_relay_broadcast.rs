//! End-to-end broadcast behaviour: ingestion adapter, dispatcher and the
//! `/events` route over a real socket.

use std::time::Duration;

use project_tests::TestRelay;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_late_subscriber_only_sees_live_messages() {
    let relay = TestRelay::start_with_ingestion(64, None).await.unwrap();

    let mut early = relay.subscribe().await;
    relay.send_upstream("A");
    relay.send_upstream("B");
    assert_eq!(early.next_event_within(WAIT).await.as_deref(), Some("A"));
    assert_eq!(early.next_event_within(WAIT).await.as_deref(), Some("B"));

    let mut late = relay.subscribe().await;
    relay.send_upstream("C");

    assert_eq!(early.next_event_within(WAIT).await.as_deref(), Some("C"));
    assert_eq!(late.next_event_within(WAIT).await.as_deref(), Some("C"));
}

#[tokio::test]
async fn test_subscribers_receive_identical_ordered_streams() {
    let relay = TestRelay::start_with_ingestion(512, None).await.unwrap();
    let mut first = relay.subscribe().await;
    let mut second = relay.subscribe().await;

    for i in 0..100 {
        relay.send_upstream(format!("{{\"n\":{}}}", i));
    }

    for i in 0..100 {
        let expected = format!("{{\"n\":{}}}", i);
        assert_eq!(first.next_event_within(WAIT).await, Some(expected.clone()));
        assert_eq!(second.next_event_within(WAIT).await, Some(expected));
    }
}

#[tokio::test]
async fn test_undecodable_items_are_skipped() {
    let relay = TestRelay::start_with_ingestion(64, None).await.unwrap();
    let mut reader = relay.subscribe().await;

    relay.send_upstream("before");
    relay.send_upstream(vec![0xff, 0xfe, 0x00]);
    relay.send_upstream("after");

    assert_eq!(reader.next_event_within(WAIT).await.as_deref(), Some("before"));
    assert_eq!(reader.next_event_within(WAIT).await.as_deref(), Some("after"));
    assert_eq!(relay.ingestion.snapshot().decode_failures, 1);
    assert_eq!(relay.ingestion.snapshot().forwarded, 2);
}

#[tokio::test]
async fn test_multiline_payload_survives_framing() {
    let relay = TestRelay::start_with_ingestion(64, None).await.unwrap();
    let mut reader = relay.subscribe().await;

    relay.send_upstream("first line\n\nthird line");
    relay.send_upstream("next");

    assert_eq!(
        reader.next_event_within(WAIT).await.as_deref(),
        Some("first line\n\nthird line")
    );
    assert_eq!(reader.next_event_within(WAIT).await.as_deref(), Some("next"));
}

#[tokio::test]
async fn test_stalled_subscriber_does_not_slow_others() {
    let relay = TestRelay::start_with_ingestion(1024, None).await.unwrap();
    let _stalled = relay.subscribe().await;
    let mut active = relay.subscribe().await;

    for i in 1..=200 {
        relay.send_upstream(format!("msg-{}", i));
    }

    for i in 1..=200 {
        assert_eq!(active.next_event_within(WAIT).await, Some(format!("msg-{}", i)));
    }
    assert_eq!(relay.dispatcher.subscriber_count(), 2);
}

#[tokio::test]
async fn test_disconnect_unregisters_subscriber() {
    let relay = TestRelay::start_with_ingestion(64, Some(Duration::from_millis(50))).await.unwrap();
    let reader = relay.subscribe().await;
    let mut other = relay.subscribe().await;

    drop(reader);
    relay.wait_for_subscribers(1).await;

    relay.send_upstream("still flowing");
    assert_eq!(other.next_event_within(WAIT).await.as_deref(), Some("still flowing"));
}

#[tokio::test]
async fn test_shutdown_ends_every_stream() {
    let relay = TestRelay::start(64, Some(Duration::from_secs(15))).await.unwrap();
    let mut reader = relay.subscribe().await;

    relay.dispatcher.shutdown();

    let end = tokio::time::timeout(WAIT, reader.next_event()).await.unwrap();
    assert_eq!(end, None);
    assert_eq!(relay.dispatcher.subscriber_count(), 0);
}
