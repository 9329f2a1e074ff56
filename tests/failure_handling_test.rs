use rask_event_streamer::sender::StreamClient;
use rask_event_streamer::transport::memory::{AckPolicy, MemoryDialer};
use rask_event_streamer::{ClientConfig, ConnectionError, Credential, Event, Session, StreamError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn config(num_streams: usize) -> ClientConfig {
    ClientConfig::session_defaults()
        .with_endpoint("localhost:50051")
        .with_num_streams(num_streams)
        .with_session_buffer(64)
}

fn events(count: usize) -> Vec<Event> {
    (0..count)
        .map(|i| Event::new(format!("user-{i}"), "test"))
        .collect()
}

#[tokio::test]
async fn test_silent_remote_is_estimated_as_success() {
    // Without any acknowledgement the worker cannot tell "still processing"
    // from "silently dropped"; every event handed over counts as succeeded.
    let dialer = MemoryDialer::new().with_ack_policy(AckPolicy::Silent);
    let session = Session::connect(Credential::new("key"), config(2), dialer.clone())
        .await
        .unwrap();

    for event in events(10) {
        session.submit(event).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    assert_eq!(dialer.acks_issued(), 0);
    assert_eq!(stats.total_sent, 10);
    assert_eq!(stats.total_succeeded, 10);
    assert_eq!(stats.total_failed, 0);
}

#[tokio::test]
async fn test_silent_remote_with_send_errors() {
    let dialer = MemoryDialer::new()
        .with_ack_policy(AckPolicy::Silent)
        .fail_sends_for("user-3")
        .fail_sends_for("user-4");
    let session = Session::connect(Credential::new("key"), config(1), dialer.clone())
        .await
        .unwrap();

    for event in events(10) {
        session.submit(event).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    assert_eq!(stats.total_sent, 10);
    assert_eq!(stats.total_succeeded, 8);
    assert_eq!(stats.total_failed, 2);
}

#[tokio::test]
async fn test_send_errors_are_absorbed_into_stats() {
    let dialer = MemoryDialer::new().fail_sends_for("user-1");
    let session = Session::connect(Credential::new("key"), config(2), dialer.clone())
        .await
        .unwrap();

    for event in events(6) {
        session.submit(event).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    assert_eq!(stats.total_sent, 6);
    assert_eq!(stats.total_succeeded, 5);
    assert_eq!(stats.total_failed, 1);
    // The worker keeps going after a failed send
    assert_eq!(dialer.received_subjects(1), ["user-3", "user-5"]);
}

#[tokio::test]
async fn test_stream_open_failure_fails_every_event() {
    let dialer = MemoryDialer::new().fail_stream_open();
    let session = Session::connect(Credential::new("key"), config(3), dialer.clone())
        .await
        .unwrap();

    for event in events(9) {
        session.submit(event).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    assert_eq!(stats.total_sent, 9);
    assert_eq!(stats.total_succeeded, 0);
    assert_eq!(stats.total_failed, 9);
    assert_eq!(dialer.total_received(), 0);
}

#[tokio::test]
async fn test_connect_failure_names_index_and_cleans_up() {
    let dialer = MemoryDialer::new().fail_dial_at(1);
    let result = Session::connect(Credential::new("key"), config(3), dialer.clone()).await;

    match result {
        Err(StreamError::Connection(ConnectionError { index, .. })) => assert_eq!(index, 1),
        other => panic!("expected connection error, got {other:?}"),
    }
    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(dialer.closed_count(), 1);
}

#[tokio::test]
async fn test_zero_streams_is_rejected() {
    let result = Session::connect(Credential::new("key"), config(0), MemoryDialer::new()).await;
    assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_cancellation_unblocks_stalled_workers() {
    let dialer = MemoryDialer::new().stall_sends();
    let session = Session::connect(Credential::new("key"), config(2), dialer.clone())
        .await
        .unwrap();
    let parent = CancellationToken::new();
    session.start_with_cancellation(&parent);

    for event in events(5) {
        session.submit(event).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    parent.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), session.finalize())
        .await
        .expect("finalize should not hang after cancellation")
        .unwrap();

    assert_eq!(stats.total_sent, 5);
    assert_eq!(stats.total_failed, 5);
    assert_eq!(stats.total_succeeded, 0);
    assert!(session.cancellation_token().is_cancelled());
}

#[tokio::test]
async fn test_streaming_after_close_requires_reconnect() {
    let dialer = MemoryDialer::new();
    let client = StreamClient::new(Credential::new("key"), config(2), dialer.clone()).unwrap();
    client.connect().await.unwrap();
    client.close().await.unwrap();

    let (_tx, rx) = mpsc::channel(1);
    let err = client
        .stream_events(rx, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, StreamError::NotConnected);

    client.connect().await.unwrap();
    let stats = client.stream_events_slice(events(4)).await.unwrap();
    assert_eq!(stats.total_succeeded, 4);
}

#[tokio::test]
async fn test_cancel_before_start_survives_parent_token() {
    let dialer = MemoryDialer::new();
    let session = Session::connect(Credential::new("key"), config(2), dialer.clone())
        .await
        .unwrap();
    session.cancel();

    let parent = CancellationToken::new();
    session.start_with_cancellation(&parent);
    assert!(session.cancellation_token().is_cancelled());
    assert!(!parent.is_cancelled());

    for event in events(4) {
        session.submit(event).await.unwrap();
    }
    let stats = tokio::time::timeout(Duration::from_secs(5), session.finalize())
        .await
        .expect("finalize should not hang")
        .unwrap();

    assert_eq!(dialer.total_received(), 0);
    assert_eq!(stats.total_sent, 4);
    assert_eq!(stats.total_failed, 4);
    assert_eq!(stats.total_succeeded, 0);
}

#[tokio::test]
async fn test_remote_ending_acks_early_does_not_hang_session() {
    let dialer = MemoryDialer::new().end_acks_after(2);
    let session = Session::connect(Credential::new("key"), config(2), dialer.clone())
        .await
        .unwrap();

    for event in events(10) {
        session.submit(event).await.unwrap();
    }
    let stats = tokio::time::timeout(Duration::from_secs(5), session.finalize())
        .await
        .expect("finalize should not hang after the remote side ends")
        .unwrap();

    assert_eq!(stats.total_sent, 10);
    assert_eq!(stats.total_succeeded, 4);
    assert_eq!(stats.total_failed, 6);
    assert!(stats.is_conserved());
}

#[tokio::test]
async fn test_close_reports_failure_after_closing_every_connection() {
    let dialer = MemoryDialer::new().fail_close_at(0);
    let session = Session::connect(Credential::new("key"), config(3), dialer.clone())
        .await
        .unwrap();

    let err = session.close().await.unwrap_err();
    assert!(matches!(err, StreamError::Close(_)), "{err:?}");
    assert_eq!(dialer.closed_count(), 3);
}

