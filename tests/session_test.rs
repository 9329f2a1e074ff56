use rask_event_streamer::transport::memory::{AckPolicy, MemoryDialer};
use rask_event_streamer::{ClientConfig, Credential, Event, Session, StreamError};
use std::collections::HashSet;
use std::time::Duration;

fn config(num_streams: usize, session_buffer: usize) -> ClientConfig {
    ClientConfig::session_defaults()
        .with_endpoint("localhost:50051")
        .with_num_streams(num_streams)
        .with_session_buffer(session_buffer)
}

fn event(i: usize) -> Event {
    Event::new(format!("user-{i}"), "test")
}

async fn session(dialer: &MemoryDialer, num_streams: usize, buffer: usize) -> Session<MemoryDialer> {
    Session::connect(Credential::new("test-key"), config(num_streams, buffer), dialer.clone())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_two_workers_receive_alternating_events() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 2, 10).await;

    for i in 0..5 {
        session.submit(event(i)).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    assert_eq!(dialer.received_subjects(0), ["user-0", "user-2", "user-4"]);
    assert_eq!(dialer.received_subjects(1), ["user-1", "user-3"]);
    assert_eq!(stats.total_sent, 5);
    assert_eq!(stats.total_succeeded, 5);
    assert_eq!(stats.total_failed, 0);
    assert_eq!(stats.total_dropped, 0);
    assert_eq!(stats.active_streams, 2);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_every_event_reaches_exactly_one_worker() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 3, 64).await;

    let total = 1_000;
    for i in 0..total {
        session.submit(event(i)).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    let mut seen = HashSet::new();
    for connection in 0..3 {
        for subject in dialer.received_subjects(connection) {
            assert!(seen.insert(subject.clone()), "{subject} delivered twice");
        }
    }
    assert_eq!(seen.len(), total);
    assert_eq!(stats.total_sent, total as u64);
}

#[tokio::test]
async fn test_round_robin_is_fair_and_ordered() {
    let dialer = MemoryDialer::new();
    let workers = 4;
    let per_worker = 25;
    let session = session(&dialer, workers, 16).await;

    for i in 0..workers * per_worker {
        session.submit(event(i)).await.unwrap();
    }
    session.finalize().await.unwrap();

    for worker in 0..workers {
        let expected: Vec<String> = (0..per_worker)
            .map(|round| format!("user-{}", round * workers + worker))
            .collect();
        assert_eq!(dialer.received_subjects(worker), expected);
    }
}

#[tokio::test]
async fn test_blocking_submission_never_drops() {
    let dialer = MemoryDialer::new();
    let client_config = config(3, 1).with_stream_queue_capacity(1);
    let session = Session::connect(Credential::new("test-key"), client_config, dialer.clone())
        .await
        .unwrap();

    for i in 0..500 {
        session.submit(event(i)).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    assert_eq!(stats.total_dropped, 0);
    assert_eq!(stats.total_sent, 500);
    assert_eq!(dialer.total_received(), 500);
}

#[tokio::test]
async fn test_rejected_non_blocking_submit_counts_one_drop() {
    let dialer = MemoryDialer::new().stall_sends();
    let session = session(&dialer, 1, 1).await;
    session.start();

    // One event stalls inside the worker, the next fills the buffer
    let mut accepted = 0;
    while session.try_submit(event(accepted)) {
        accepted += 1;
        assert!(accepted < 100, "buffer never filled");
        tokio::task::yield_now().await;
    }

    session.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(5), session.finalize())
        .await
        .expect("cancelled session should finalize")
        .unwrap();

    assert_eq!(stats.total_dropped, 1);
    assert_eq!(stats.total_sent, accepted as u64);
    assert_eq!(dialer.total_received(), 0);
}

#[tokio::test]
async fn test_acknowledged_events_are_conserved() {
    let rejected: HashSet<String> = (0..100)
        .filter(|i| i % 7 == 0)
        .map(|i| format!("user-{i}"))
        .collect();
    let dialer = MemoryDialer::new().with_ack_policy(AckPolicy::RejectSubjects(rejected.clone()));
    let session = session(&dialer, 3, 32).await;

    for i in 0..100 {
        session.submit(event(i)).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    assert_eq!(stats.total_succeeded + stats.total_failed, stats.total_sent);
    assert_eq!(stats.total_failed, rejected.len() as u64);
    assert!(stats.is_conserved());
}

#[tokio::test]
async fn test_start_twice_launches_one_pipeline() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 2, 10).await;

    session.start();
    session.start();
    assert!(session.is_started());

    for i in 0..4 {
        session.submit(event(i)).await.unwrap();
    }
    let stats = session.finalize().await.unwrap();

    assert_eq!(dialer.streams_opened(), 2);
    assert_eq!(stats.total_sent, 4);
}

#[tokio::test]
async fn test_finalize_before_start_is_rejected_without_side_effects() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 2, 10).await;

    assert_eq!(session.finalize().await, Err(StreamError::NotStarted));
    assert_eq!(dialer.streams_opened(), 0);
    assert_eq!(dialer.closed_count(), 0);

    // The session is still usable afterwards
    session.submit(event(0)).await.unwrap();
    let stats = session.finalize().await.unwrap();
    assert_eq!(stats.total_sent, 1);
}

#[tokio::test]
async fn test_non_blocking_submit_on_unstarted_session() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 2, 10).await;

    assert!(!session.try_submit(event(0)));
    assert!(!session.is_started());

    session.start();
    let stats = session.finalize().await.unwrap();
    assert_eq!(stats.total_dropped, 0);
    assert_eq!(stats.total_sent, 0);
}

#[tokio::test]
async fn test_submit_auto_starts_session() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 1, 10).await;

    assert!(!session.is_started());
    session.submit(event(0)).await.unwrap();
    assert!(session.is_started());

    assert!(session.try_submit(event(1)));
    let stats = session.finalize().await.unwrap();
    assert_eq!(stats.total_sent, 2);
}

#[tokio::test]
async fn test_repeated_finalize_returns_same_result() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 2, 10).await;

    for i in 0..3 {
        session.submit(event(i)).await.unwrap();
    }
    let first = session.finalize().await.unwrap();
    let second = session.finalize().await.unwrap();

    assert_eq!(first, second);
    assert!(session.is_finalized());
    assert_eq!(session.finalized_stats(), Some(first));
}

#[tokio::test]
async fn test_submissions_after_finalize_are_rejected() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 1, 10).await;

    session.submit(event(0)).await.unwrap();
    let stats = session.finalize().await.unwrap();

    assert_eq!(session.submit(event(1)).await, Err(StreamError::SessionClosed));
    assert!(!session.try_submit(event(2)));

    // A rejected late submit is not a drop
    assert_eq!(session.finalize().await.unwrap().total_dropped, stats.total_dropped);
    assert_eq!(dialer.total_received(), 1);
}

#[tokio::test]
async fn test_close_without_finalize_tears_down_pool() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 3, 10).await;

    for i in 0..6 {
        session.submit(event(i)).await.unwrap();
    }
    session.close().await.unwrap();

    assert_eq!(dialer.total_received(), 6);
    assert_eq!(dialer.closed_count(), 3);
    assert_eq!(session.finalized_stats().map(|s| s.total_sent), Some(6));
}

#[tokio::test]
async fn test_close_on_never_started_session() {
    let dialer = MemoryDialer::new();
    let session = session(&dialer, 2, 10).await;

    session.close().await.unwrap();
    assert_eq!(dialer.closed_count(), 2);
    assert_eq!(session.submit(event(0)).await, Err(StreamError::SessionClosed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_submit_from_plain_threads() {
    let dialer = MemoryDialer::new();
    let session = std::sync::Arc::new(session(&dialer, 2, 4).await);

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let session = std::sync::Arc::clone(&session);
            std::thread::spawn(move || {
                for i in 0..50 {
                    session
                        .blocking_submit(Event::new(format!("p{producer}-{i}"), "test"))
                        .unwrap();
                }
            })
        })
        .collect();

    tokio::task::spawn_blocking(move || {
        for producer in producers {
            producer.join().unwrap();
        }
    })
    .await
    .unwrap();

    let stats = session.finalize().await.unwrap();
    assert_eq!(stats.total_sent, 200);
    assert_eq!(stats.total_dropped, 0);
}
