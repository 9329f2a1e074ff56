use super::client::{ClientConfig, StreamClient};
use super::stats::StreamStats;
use crate::domain::{Event, StreamError};
use crate::transport::{Credential, Dialer};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

#[cfg(feature = "metrics")]
use super::metrics::StreamMetrics;

type PipelineResult = Result<StreamStats, StreamError>;

/// One start-to-finalize streaming lifecycle over a connected client.
///
/// `Created -> Started -> Finalized`. A session is single-use: after
/// `finalize` it cannot be restarted, and submissions are rejected.
#[derive(Debug)]
pub struct Session<D: Dialer> {
    id: Uuid,
    client: Arc<StreamClient<D>>,
    runtime: Handle,
    cancel: Mutex<CancellationToken>,
    started: AtomicBool,
    inbound_tx: Mutex<Option<mpsc::Sender<Event>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    pipeline: Mutex<Option<JoinHandle<PipelineResult>>>,
    outcome: OnceCell<PipelineResult>,
    dropped: AtomicU64,
    #[cfg(feature = "metrics")]
    metrics: Option<StreamMetrics>,
}

impl<D: Dialer> Session<D> {
    /// Connects a new client and wraps it in a session.
    pub async fn connect(
        credential: Credential,
        config: ClientConfig,
        dialer: D,
    ) -> Result<Self, StreamError> {
        let client = StreamClient::new(credential, config, dialer)?;
        client.connect().await?;
        Ok(Self::from_client(Arc::new(client), Handle::current()))
    }

    /// Builds a session over an already connected client.
    ///
    /// The pipeline task is spawned on `runtime`, so `start` and the
    /// submission methods also work from threads outside the runtime.
    pub fn from_client(client: Arc<StreamClient<D>>, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::channel(client.config().session_buffer.max(1));
        Self {
            id: Uuid::new_v4(),
            client,
            runtime,
            cancel: Mutex::new(CancellationToken::new()),
            started: AtomicBool::new(false),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
            pipeline: Mutex::new(None),
            outcome: OnceCell::new(),
            dropped: AtomicU64::new(0),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Records every finalized session on these metrics.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: StreamMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &Arc<StreamClient<D>> {
        &self.client
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.initialized()
    }

    /// Token governing the running pipeline; cancelling it stops every worker.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Launches the streaming pipeline. Later calls are no-ops.
    pub fn start(&self) {
        self.launch(None);
    }

    /// Like [`Session::start`], with the pipeline also cancelled by `parent`.
    pub fn start_with_cancellation(&self, parent: &CancellationToken) {
        self.launch(Some(parent));
    }

    fn launch(&self, parent: Option<&CancellationToken>) {
        // Holding the receiver slot serializes concurrent starts
        let mut inbound_rx = self.inbound_rx.lock();
        let Some(rx) = inbound_rx.take() else {
            return;
        };

        let cancel = {
            let mut current = self.cancel.lock();
            if let Some(parent) = parent {
                let child = parent.child_token();
                // A cancel issued before start still applies
                if current.is_cancelled() {
                    child.cancel();
                }
                *current = child;
            }
            current.clone()
        };

        let client = Arc::clone(&self.client);
        let span = info_span!("session", id = %self.id);
        let handle = self
            .runtime
            .spawn(async move { client.stream_events(rx, cancel).await }.instrument(span));

        *self.pipeline.lock() = Some(handle);
        self.started.store(true, Ordering::Release);
        info!(session = %self.id, streams = self.client.config().num_streams, "Session started");
    }

    /// Submits an event, waiting for buffer space when the session is full.
    ///
    /// Starts the session if needed. Never drops an event.
    pub async fn submit(&self, event: Event) -> Result<(), StreamError> {
        let tx = self.sender()?;
        tx.send(event).await.map_err(|_| StreamError::SessionClosed)
    }

    /// Blocking variant of [`Session::submit`] for producers on plain threads.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_submit(&self, event: Event) -> Result<(), StreamError> {
        let tx = self.sender()?;
        tx.blocking_send(event).map_err(|_| StreamError::SessionClosed)
    }

    fn sender(&self) -> Result<mpsc::Sender<Event>, StreamError> {
        self.start();
        self.inbound_tx
            .lock()
            .clone()
            .ok_or(StreamError::SessionClosed)
    }

    /// Submits without waiting.
    ///
    /// Returns `false` when the session has not started, is finalized, or its
    /// buffer is full. Only the full-buffer case counts as a drop.
    pub fn try_submit(&self, event: Event) -> bool {
        if !self.is_started() {
            return false;
        }

        let inbound_tx = self.inbound_tx.lock();
        let Some(tx) = inbound_tx.as_ref() else {
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Closes the inbound buffer, waits for the pipeline and returns the final
    /// statistics. Repeated calls return the same result.
    pub async fn finalize(&self) -> Result<StreamStats, StreamError> {
        if !self.is_started() {
            return Err(StreamError::NotStarted);
        }
        self.outcome.get_or_init(|| self.complete()).await.clone()
    }

    async fn complete(&self) -> PipelineResult {
        // Dropping the last sender signals end of input to the pipeline
        drop(self.inbound_tx.lock().take());

        let handle = self.pipeline.lock().take();
        let Some(handle) = handle else {
            return Err(StreamError::PipelineAborted(
                "pipeline was never launched".to_string(),
            ));
        };

        let mut stats = match handle.await {
            Ok(result) => result?,
            Err(e) => return Err(StreamError::PipelineAborted(e.to_string())),
        };
        // The only point where drops are merged into the statistics
        stats.total_dropped = self.dropped.load(Ordering::Relaxed);

        info!(
            session = %self.id,
            sent = stats.total_sent,
            succeeded = stats.total_succeeded,
            failed = stats.total_failed,
            dropped = stats.total_dropped,
            duration_ms = stats.duration.as_millis() as u64,
            "Session finalized"
        );

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record(&stats);
        }

        Ok(stats)
    }

    /// Statistics of a successfully finalized session.
    pub fn finalized_stats(&self) -> Option<StreamStats> {
        self.outcome.get().and_then(|result| result.as_ref().ok().cloned())
    }

    /// Finalizes if still running, then closes every connection.
    pub async fn close(&self) -> Result<(), StreamError> {
        if self.is_started() {
            if let Err(e) = self.finalize().await {
                warn!(session = %self.id, error = %e, "Finalize during close failed");
            }
        } else {
            drop(self.inbound_tx.lock().take());
            drop(self.inbound_rx.lock().take());
            debug!(session = %self.id, "Closing session that was never started");
        }

        self.client.close().await
    }
}
