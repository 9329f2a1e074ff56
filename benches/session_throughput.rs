use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rask_event_streamer::transport::memory::MemoryDialer;
use rask_event_streamer::{ClientConfig, Credential, Event, Session};
use std::hint::black_box;
use tokio::runtime::Runtime;

const EVENTS: usize = 20_000;

fn build_events(count: usize) -> Vec<Event> {
    (0..count)
        .map(|i| {
            Event::new(format!("user-{}", i % 100), "page_view")
                .with_data("index", i)
                .with_data("path", "/products/42")
        })
        .collect()
}

async fn stream_once(num_streams: usize, events: Vec<Event>) -> u64 {
    let config = ClientConfig::session_defaults()
        .with_endpoint("localhost:50051")
        .with_num_streams(num_streams);
    let session = match Session::connect(Credential::new("bench"), config, MemoryDialer::new()).await {
        Ok(session) => session,
        Err(e) => panic!("connect failed: {e}"),
    };

    for event in events {
        if session.submit(event).await.is_err() {
            break;
        }
    }
    let sent = session.finalize().await.map(|stats| stats.total_sent).unwrap_or(0);
    let _ = session.close().await;
    sent
}

fn bench_session_throughput(c: &mut Criterion) {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => panic!("runtime: {e}"),
    };
    let mut group = c.benchmark_group("session_throughput");
    group.throughput(Throughput::Elements(EVENTS as u64));

    for num_streams in [1, 2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_streams),
            &num_streams,
            |b, &num_streams| {
                b.to_async(&runtime).iter_batched(
                    || build_events(EVENTS),
                    |events| async move { black_box(stream_once(num_streams, events).await) },
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_non_blocking_submit(c: &mut Criterion) {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => panic!("runtime: {e}"),
    };

    c.bench_function("try_submit_4_streams", |b| {
        b.to_async(&runtime).iter_batched(
            || build_events(EVENTS),
            |events| async move {
                let config = ClientConfig::session_defaults().with_endpoint("localhost:50051");
                let session = Session::connect(Credential::new("bench"), config, MemoryDialer::new())
                    .await
                    .ok()?;
                session.start();
                for event in events {
                    black_box(session.try_submit(event));
                }
                let stats = session.finalize().await.ok()?;
                Some(stats.total_dropped)
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_session_throughput, bench_non_blocking_submit);
criterion_main!(benches);
