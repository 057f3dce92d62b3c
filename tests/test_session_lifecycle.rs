//! Session lifecycle: start/stop semantics, subscription replay, message
//! forwarding and the publish surface, all against the mock transport.


use std::sync::Arc;

use pumplink::session::{ConnectionState, SessionEvent};
use pumplink::testing::mocks::{MockCredentialSource, MockTransport};
use pumplink::SessionError;
use test_helpers::*;

#[tokio::test(start_paused = true)]
async fn test_start_connects_and_replays_default_topics() {
    let harness = spawn();
    harness.session.start().unwrap();

    wait_for_state(&harness.session, ConnectionState::Connected).await;
    wait_until(|| !harness.transport.subscribe_batches().is_empty()).await;

    assert_eq!(harness.transport.open_count(), 1);
    assert_eq!(
        harness.transport.subscribe_batches(),
        vec![vec!["pump/status".to_string()]]
    );
}

#[tokio::test(start_paused = true)]
async fn test_topics_registered_before_connect_replay_in_one_batch() {
    let mut config = test_config();
    config.default_topics = vec![];
    let harness = spawn_with(
        config,
        MockTransport::new(),
        Arc::new(MockCredentialSource::with_valid()),
    );

    harness.session.subscribe("pump/status").unwrap();
    harness.session.subscribe("pump/alerts").unwrap();
    harness.session.start().unwrap();

    wait_for_state(&harness.session, ConnectionState::Connected).await;
    wait_until(|| !harness.transport.subscribe_batches().is_empty()).await;

    let batches = harness.transport.subscribe_batches();
    assert_eq!(batches.len(), 1, "replay must be a single batch");
    assert_eq!(batches[0].len(), 2);
    assert!(batches[0].contains(&"pump/status".to_string()));
    assert!(batches[0].contains(&"pump/alerts".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_start_is_a_noop() {
    let mut harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;

    harness.session.start().unwrap();
    drain_events(&mut harness.events).await;

    assert_eq!(harness.transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ten_messages_forwarded_in_arrival_order() {
    let mut harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;
    drain_events(&mut harness.events).await;

    for i in 0..10 {
        let payload = format!("reading-{i}");
        assert!(
            harness
                .transport
                .emit_message("pump/status", payload.as_bytes())
                .await
        );
    }

    let mut received = Vec::new();
    while received.len() < 10 {
        if let SessionEvent::MessageReceived { topic, payload } =
            next_event(&mut harness.events).await
        {
            assert_eq!(topic, "pump/status");
            received.push(String::from_utf8(payload).unwrap());
        }
    }

    let expected: Vec<String> = (0..10).map(|i| format!("reading-{i}")).collect();
    assert_eq!(received, expected, "no drops, duplicates or reordering");
}

#[tokio::test(start_paused = true)]
async fn test_device_status_derived_from_single_key_payload() {
    let mut harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;
    drain_events(&mut harness.events).await;

    harness
        .transport
        .emit_message("pump/status", br#"{"pump-7": "running"}"#)
        .await;

    let first = next_event(&mut harness.events).await;
    assert!(matches!(first, SessionEvent::MessageReceived { .. }));

    match next_event(&mut harness.events).await {
        SessionEvent::DeviceStatusChanged { device_id, status } => {
            assert_eq!(device_id, "pump-7");
            assert_eq!(status, "running");
        }
        other => panic!("expected device status event, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_is_forwarded_raw_and_nonfatal() {
    let mut harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;
    drain_events(&mut harness.events).await;

    harness
        .transport
        .emit_message("pump/status", b"{not json")
        .await;

    let events = drain_events(&mut harness.events).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::MessageReceived { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::DeviceStatusChanged { .. })));
    assert_eq!(harness.session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_while_connected_applies_live() {
    let harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;
    wait_until(|| !harness.transport.subscribe_batches().is_empty()).await;

    harness.session.subscribe("pump/extra").unwrap();
    wait_until(|| harness.transport.subscribe_batches().len() == 2).await;

    let batches = harness.transport.subscribe_batches();
    assert_eq!(batches[1], vec!["pump/extra".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_all_live_unsubscribes_then_clears() {
    let harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;
    wait_until(|| !harness.transport.subscribe_batches().is_empty()).await;

    harness.session.unsubscribe_all().unwrap();
    wait_until(|| !harness.transport.unsubscribed().is_empty()).await;
    assert_eq!(
        harness.transport.unsubscribed(),
        vec!["pump/status".to_string()]
    );

    // After the set is cleared, a reconnect replays nothing.
    harness.transport.emit_closed().await;
    wait_for_open_count(&harness.transport, 2).await;
    wait_for_state(&harness.session, ConnectionState::Connected).await;
    assert_eq!(harness.transport.subscribe_batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_all_while_idle_clears_bookkeeping() {
    let harness = spawn();
    harness.session.unsubscribe_all().unwrap();
    harness.session.start().unwrap();

    wait_for_state(&harness.session, ConnectionState::Connected).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(harness.transport.unsubscribed().is_empty());
    assert!(harness.transport.subscribe_batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_publish_requires_connection() {
    let harness = spawn();

    let result = harness.session.publish("pump/cmd", b"go".to_vec()).await;
    assert!(matches!(result, Err(SessionError::NotConnected { .. })));

    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;

    harness
        .session
        .publish("pump/cmd", b"go".to_vec())
        .await
        .unwrap();
    assert_eq!(
        harness.transport.published(),
        vec![("pump/cmd".to_string(), b"go".to_vec())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_publishes_all_land() {
    let harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;

    let publishes = (0..3).map(|i| {
        harness
            .session
            .publish("pump/cmd", format!("cmd-{i}").into_bytes())
    });
    let results = futures::future::join_all(publishes).await;
    assert!(results.into_iter().all(|r| r.is_ok()));
    assert_eq!(harness.transport.published().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stop_goes_silent() {
    let mut harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;
    drain_events(&mut harness.events).await;

    harness.session.stop().unwrap();
    wait_for_state(&harness.session, ConnectionState::Idle).await;

    let during_stop = drain_events(&mut harness.events).await;
    assert!(during_stop
        .iter()
        .any(|e| matches!(e, SessionEvent::StatusChanged(ConnectionState::Disconnected))));

    // The link was torn down; nothing can be delivered to the session.
    assert!(!harness.transport.emit_connected().await);

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    assert!(harness.events.try_recv().is_err());
    assert_eq!(harness.transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_start_resumes_with_same_topics() {
    let mut harness = spawn();
    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;

    harness.session.stop().unwrap();
    wait_for_state(&harness.session, ConnectionState::Idle).await;
    drain_events(&mut harness.events).await;

    harness.session.start().unwrap();
    wait_for_state(&harness.session, ConnectionState::Connected).await;
    wait_until(|| harness.transport.subscribe_batches().len() == 2).await;

    assert_eq!(harness.transport.open_count(), 2);
    assert_eq!(
        harness.transport.subscribe_batches()[1],
        vec!["pump/status".to_string()]
    );
}
