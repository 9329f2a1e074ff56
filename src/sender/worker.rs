use super::stats::StreamTally;
use crate::domain::{Acknowledgement, Event, TransportError};
use crate::transport::{AckStream, Connection, Credential, EventRecord, EventSink};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Drives one connection's duplex stream from open to end of input.
///
/// Failures never escape a worker; they only show up in the returned tally.
#[derive(Debug)]
pub struct StreamWorker<C: Connection> {
    index: usize,
    connection: C,
    credential: Credential,
    cancel: CancellationToken,
    open_timeout: Option<Duration>,
}

#[derive(Debug, Default, Clone, Copy)]
struct SendCounts {
    sent: u64,
    errors: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct AckCounts {
    ok: u64,
    failed: u64,
}

impl<C: Connection> StreamWorker<C> {
    pub fn new(
        index: usize,
        connection: C,
        credential: Credential,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            index,
            connection,
            credential,
            cancel,
            open_timeout: None,
        }
    }

    /// Gives up on opening the stream after `timeout`. Without one, only
    /// cancellation bounds the wait.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    async fn open_stream(&self) -> Result<(C::Sink, C::Acks), TransportError> {
        let open = self.connection.open_stream(&self.credential);
        match self.open_timeout {
            Some(timeout) => tokio::time::timeout(timeout, open).await.map_err(|_| {
                TransportError::StreamOpen(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                ))
            })?,
            None => open.await,
        }
    }

    /// Streams every event from `queue` until the owner closes it.
    ///
    /// The queue is always drained to the end, even when the stream never
    /// opened, so the producer side cannot block on a dead worker.
    #[instrument(name = "stream_worker", skip_all, fields(stream = self.index))]
    pub async fn run(self, mut queue: mpsc::Receiver<Event>) -> StreamTally {
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.open_stream() => result,
        };

        let (sink, acks) = match opened {
            Ok(halves) => halves,
            Err(e) => {
                warn!(error = %e, "Failed to open event stream, queued events count as failed");
                return drain_as_failed(&mut queue).await;
            }
        };

        // Cancelled by the receive loop once the remote side stops answering
        let remote_done = CancellationToken::new();
        let (sends, acks) = tokio::join!(
            send_loop(sink, queue, &self.cancel, &remote_done),
            receive_loop(acks, &self.cancel, &remote_done),
        );

        let tally = reconcile(sends.sent, sends.errors, acks.ok, acks.failed);
        debug!(
            sent = tally.sent,
            succeeded = tally.succeeded,
            failed = tally.failed,
            send_errors = sends.errors,
            acks = acks.ok + acks.failed,
            "Stream worker finished"
        );
        tally
    }
}

async fn send_loop<S: EventSink>(
    mut sink: S,
    mut queue: mpsc::Receiver<Event>,
    cancel: &CancellationToken,
    remote_done: &CancellationToken,
) -> SendCounts {
    let mut counts = SendCounts::default();

    while let Some(event) = queue.recv().await {
        counts.sent += 1;
        if cancel.is_cancelled() || remote_done.is_cancelled() {
            counts.errors += 1;
            continue;
        }

        let subject_id = event.subject_id.clone();
        let record = EventRecord::from(event);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            () = remote_done.cancelled() => Err(TransportError::StreamClosed),
            result = sink.send(record) => result,
        };

        if let Err(e) = result {
            counts.errors += 1;
            debug!(error = %e, subject_id = %subject_id, "Event send failed");
        }
    }

    sink.close_send().await;
    counts
}

async fn receive_loop<A: AckStream>(
    mut acks: A,
    cancel: &CancellationToken,
    remote_done: &CancellationToken,
) -> AckCounts {
    let mut counts = AckCounts::default();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = acks.next_ack() => next,
        };

        match next {
            Some(Ok(record)) => {
                let ack = Acknowledgement::from(record);
                if ack.is_failure() {
                    counts.failed += 1;
                    debug!(
                        event_id = %ack.event_id,
                        error = ack.error.as_deref().unwrap_or_default(),
                        "Event rejected by remote"
                    );
                } else {
                    counts.ok += 1;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Acknowledgement stream failed");
                break;
            }
            None => break,
        }
    }

    remote_done.cancel();
    counts
}

async fn drain_as_failed(queue: &mut mpsc::Receiver<Event>) -> StreamTally {
    let mut drained = 0;
    while queue.recv().await.is_some() {
        drained += 1;
    }
    StreamTally::new(drained, 0, drained)
}

/// Folds local send counters and remote acknowledgements into one tally.
///
/// Acknowledgements are authoritative when any arrived at all. When none did,
/// every event handed to the transport without error is assumed to have
/// succeeded. That branch is an estimate: it cannot tell a remote side that
/// processes asynchronously from one that silently dropped events.
pub fn reconcile(sent: u64, send_errors: u64, ack_ok: u64, ack_failed: u64) -> StreamTally {
    if ack_ok + ack_failed > 0 {
        StreamTally::new(sent, ack_ok, ack_failed + send_errors)
    } else {
        StreamTally::new(sent, sent.saturating_sub(send_errors), send_errors)
    }
}
