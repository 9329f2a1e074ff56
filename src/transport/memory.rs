//! In-process loopback transport.
//!
//! Every connection records the events it receives and answers them according
//! to an [`AckPolicy`]. Failure injection covers the paths a real network takes
//! down: refused dials, streams that fail or hang while opening, sends that fail
//! or never complete, acknowledgement streams cut short, and failing closes.

use super::{AckStream, Connection, Credential, DialOptions, Dialer, EventSink};
use crate::domain::TransportError;
use crate::transport::wire::{AckRecord, EventRecord};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// How the loopback side answers received events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// One `ok` acknowledgement per event.
    #[default]
    AcceptAll,
    /// Never acknowledges anything, like a fully asynchronous backend.
    Silent,
    /// Acknowledges every event, with status `failed` for the listed subjects.
    RejectSubjects(HashSet<String>),
}

/// How a cut-short acknowledgement stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCutoff {
    /// The remote side ends the stream cleanly.
    End,
    /// The stream breaks with a receive error.
    Fail,
}

#[derive(Debug, Default)]
struct MemoryState {
    policy: AckPolicy,
    fail_dial_at: Option<usize>,
    fail_stream_open: bool,
    stall_stream_open: bool,
    fail_sends_for: HashSet<String>,
    stall_sends: bool,
    ack_cutoff: Option<(u64, AckCutoff)>,
    fail_close_at: Option<usize>,
    dials: AtomicUsize,
    streams_opened: AtomicUsize,
    closed: AtomicUsize,
    acks_issued: AtomicU64,
    received: Mutex<Vec<Vec<EventRecord>>>,
}

/// Dialer handing out loopback connections. Clones share recorded state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDialer {
    state: Arc<MemoryState>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, apply: impl FnOnce(&mut MemoryState)) -> Self {
        // Configuration happens before the dialer is shared
        match Arc::get_mut(&mut self.state) {
            Some(state) => apply(state),
            None => {
                let mut fresh = MemoryState {
                    policy: self.state.policy.clone(),
                    fail_dial_at: self.state.fail_dial_at,
                    fail_stream_open: self.state.fail_stream_open,
                    stall_stream_open: self.state.stall_stream_open,
                    fail_sends_for: self.state.fail_sends_for.clone(),
                    stall_sends: self.state.stall_sends,
                    ack_cutoff: self.state.ack_cutoff,
                    fail_close_at: self.state.fail_close_at,
                    ..MemoryState::default()
                };
                apply(&mut fresh);
                self.state = Arc::new(fresh);
            }
        }
        self
    }

    pub fn with_ack_policy(self, policy: AckPolicy) -> Self {
        self.configure(|state| state.policy = policy)
    }

    /// The dial with this zero-based attempt number fails.
    pub fn fail_dial_at(self, attempt: usize) -> Self {
        self.configure(|state| state.fail_dial_at = Some(attempt))
    }

    pub fn fail_stream_open(self) -> Self {
        self.configure(|state| state.fail_stream_open = true)
    }

    /// Opening a stream never completes; only a timeout or cancellation ends it.
    pub fn stall_stream_open(self) -> Self {
        self.configure(|state| state.stall_stream_open = true)
    }

    /// Each stream acknowledges its first `count` events, then the remote side
    /// ends the stream and stops reading further sends.
    pub fn end_acks_after(self, count: u64) -> Self {
        self.configure(|state| state.ack_cutoff = Some((count, AckCutoff::End)))
    }

    /// Like [`MemoryDialer::end_acks_after`], with the stream breaking instead.
    pub fn fail_acks_after(self, count: u64) -> Self {
        self.configure(|state| state.ack_cutoff = Some((count, AckCutoff::Fail)))
    }

    /// Closing the connection created by this dial attempt reports an error.
    /// The close is still counted.
    pub fn fail_close_at(self, connection: usize) -> Self {
        self.configure(|state| state.fail_close_at = Some(connection))
    }

    /// Sends of events with this subject fail on the transport.
    pub fn fail_sends_for(self, subject_id: impl Into<String>) -> Self {
        let subject_id = subject_id.into();
        self.configure(|state| {
            state.fail_sends_for.insert(subject_id);
        })
    }

    /// Sends never complete; only cancellation gets a worker past them.
    pub fn stall_sends(self) -> Self {
        self.configure(|state| state.stall_sends = true)
    }

    pub fn dial_count(&self) -> usize {
        self.state.dials.load(Ordering::Acquire)
    }

    pub fn streams_opened(&self) -> usize {
        self.state.streams_opened.load(Ordering::Acquire)
    }

    /// Close attempts, failed ones included.
    pub fn closed_count(&self) -> usize {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn acks_issued(&self) -> u64 {
        self.state.acks_issued.load(Ordering::Acquire)
    }

    /// Events recorded by the connection created by the given dial attempt.
    pub fn received(&self, connection: usize) -> Vec<EventRecord> {
        self.state
            .received
            .lock()
            .get(connection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn received_subjects(&self, connection: usize) -> Vec<String> {
        self.received(connection)
            .into_iter()
            .map(|record| record.subject_id)
            .collect()
    }

    pub fn total_received(&self) -> usize {
        self.state.received.lock().iter().map(Vec::len).sum()
    }
}

impl Dialer for MemoryDialer {
    type Connection = MemoryConnection;

    async fn dial(&self, options: &DialOptions) -> Result<MemoryConnection, TransportError> {
        let attempt = self.state.dials.fetch_add(1, Ordering::AcqRel);
        if self.state.fail_dial_at == Some(attempt) {
            return Err(TransportError::Dial {
                endpoint: options.endpoint.clone(),
                reason: format!("injected failure on dial {attempt}"),
            });
        }

        let mut received = self.state.received.lock();
        if received.len() <= attempt {
            received.resize_with(attempt + 1, Vec::new);
        }

        Ok(MemoryConnection {
            index: attempt,
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnection {
    index: usize,
    state: Arc<MemoryState>,
}

impl MemoryConnection {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Connection for MemoryConnection {
    type Sink = MemorySink;
    type Acks = MemoryAcks;

    async fn open_stream(
        &self,
        _credential: &Credential,
    ) -> Result<(MemorySink, MemoryAcks), TransportError> {
        if self.state.stall_stream_open {
            std::future::pending::<()>().await;
        }
        if self.state.fail_stream_open {
            return Err(TransportError::StreamOpen(
                "injected stream open failure".to_string(),
            ));
        }

        self.state.streams_opened.fetch_add(1, Ordering::AcqRel);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let sink = MemorySink {
            connection: self.clone(),
            acks: Some(ack_tx),
            sequence: 0,
        };
        let acks = MemoryAcks {
            rx: ack_rx,
            delivered: 0,
            cutoff: self.state.ack_cutoff,
        };
        Ok((sink, acks))
    }

    async fn close(self) -> Result<(), TransportError> {
        self.state.closed.fetch_add(1, Ordering::AcqRel);
        if self.state.fail_close_at == Some(self.index) {
            return Err(TransportError::Close(format!(
                "injected close failure on connection {}",
                self.index
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemorySink {
    connection: MemoryConnection,
    acks: Option<mpsc::UnboundedSender<AckRecord>>,
    sequence: u64,
}

impl MemorySink {
    fn acknowledge(&mut self, record: &EventRecord) {
        let state = &self.connection.state;
        let status = match &state.policy {
            AckPolicy::Silent => return,
            AckPolicy::AcceptAll => "ok",
            AckPolicy::RejectSubjects(subjects) if subjects.contains(&record.subject_id) => {
                "failed"
            }
            AckPolicy::RejectSubjects(_) => "ok",
        };

        let Some(acks) = &self.acks else { return };
        let ack = AckRecord {
            event_id: format!("evt-{}-{}", self.connection.index, self.sequence),
            certificate_id: format!("cert-{}-{}", self.connection.index, self.sequence),
            status: status.to_string(),
            error: if status == "failed" {
                "rejected by loopback".to_string()
            } else {
                String::new()
            },
        };
        if acks.send(ack).is_ok() {
            state.acks_issued.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl EventSink for MemorySink {
    async fn send(&mut self, record: EventRecord) -> Result<(), TransportError> {
        let state = Arc::clone(&self.connection.state);
        let remote_gone = matches!(state.ack_cutoff, Some((count, _)) if self.sequence >= count);
        if state.stall_sends || remote_gone {
            std::future::pending::<()>().await;
        }
        if self.acks.is_none() {
            return Err(TransportError::StreamClosed);
        }
        if state.fail_sends_for.contains(&record.subject_id) {
            return Err(TransportError::Send(format!(
                "injected send failure for {}",
                record.subject_id
            )));
        }

        self.sequence += 1;
        self.acknowledge(&record);
        if let Some(events) = state.received.lock().get_mut(self.connection.index) {
            events.push(record);
        }
        Ok(())
    }

    async fn close_send(&mut self) {
        // Dropping the ack sender ends the receive side once drained
        self.acks = None;
    }
}

#[derive(Debug)]
pub struct MemoryAcks {
    rx: mpsc::UnboundedReceiver<AckRecord>,
    delivered: u64,
    cutoff: Option<(u64, AckCutoff)>,
}

impl AckStream for MemoryAcks {
    async fn next_ack(&mut self) -> Option<Result<AckRecord, TransportError>> {
        match self.cutoff {
            Some((count, AckCutoff::End)) if self.delivered >= count => return None,
            Some((count, AckCutoff::Fail)) if self.delivered >= count => {
                return Some(Err(TransportError::Receive(
                    "injected acknowledgement stream failure".to_string(),
                )));
            }
            _ => {}
        }

        let ack = self.rx.recv().await?;
        self.delivered += 1;
        Some(Ok(ack))
    }
}
