use super::stats::{AtomicStreamCounters, StreamTally};
use super::worker::StreamWorker;
use crate::domain::Event;
use crate::transport::{Connection, Credential};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Default capacity of each per-worker queue.
pub const PER_STREAM_QUEUE_CAPACITY: usize = 10_000;

/// Fans one inbound flow out to a worker per connection and folds their
/// tallies back together.
#[derive(Debug)]
pub struct Distributor<C: Connection> {
    connections: Vec<C>,
    credential: Credential,
    queue_capacity: usize,
    open_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<C: Connection> Distributor<C> {
    pub fn new(connections: Vec<C>, credential: Credential, cancel: CancellationToken) -> Self {
        Self {
            connections,
            credential,
            queue_capacity: PER_STREAM_QUEUE_CAPACITY,
            open_timeout: None,
            cancel,
        }
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    /// Bounds how long each worker waits for its stream to open.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    fn worker(&self, index: usize, connection: C) -> StreamWorker<C> {
        let worker =
            StreamWorker::new(index, connection, self.credential.clone(), self.cancel.clone());
        match self.open_timeout {
            Some(timeout) => worker.with_open_timeout(timeout),
            None => worker,
        }
    }

    /// Runs until `inbound` is closed and drained and every worker has exited.
    ///
    /// Event `n` goes to worker `n % k`, in pool order. A single connection is
    /// driven directly from `inbound` without an extra queue hop.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Event>) -> StreamTally {
        match self.connections.len() {
            0 => {
                warn!("No connections to distribute to, inbound events count as failed");
                let counters = AtomicStreamCounters::new();
                while inbound.recv().await.is_some() {
                    counters.record_undeliverable();
                }
                counters.snapshot()
            }
            1 => {
                let Some(connection) = self.connections.pop() else {
                    return StreamTally::default();
                };
                self.worker(0, connection).run(inbound).await
            }
            _ => self.fan_out(inbound).await,
        }
    }

    async fn fan_out(mut self, mut inbound: mpsc::Receiver<Event>) -> StreamTally {
        let counters = Arc::new(AtomicStreamCounters::new());
        let mut workers = JoinSet::new();
        let connections = std::mem::take(&mut self.connections);
        let mut queues = Vec::with_capacity(connections.len());

        for (index, connection) in connections.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            queues.push(tx);

            let worker = self.worker(index, connection);
            let counters = Arc::clone(&counters);
            workers.spawn(async move {
                counters.record(worker.run(rx).await);
            });
        }

        debug!(workers = queues.len(), "Distributing events round-robin");

        let mut next: usize = 0;
        while let Some(event) = inbound.recv().await {
            let target = next % queues.len();
            next = next.wrapping_add(1);

            if queues[target].send(event).await.is_err() {
                // Only happens when the worker task is already gone
                counters.record_undeliverable();
            }
        }

        // Closing every queue lets each worker observe end of input
        drop(queues);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Stream worker task failed");
            }
        }

        counters.snapshot()
    }
}
