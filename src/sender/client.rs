use super::distributor::{Distributor, PER_STREAM_QUEUE_CAPACITY};
use super::pool::ConnectionPool;
use super::stats::StreamStats;
use crate::domain::{Event, StreamError};
use crate::transport::{implies_tls, Credential, DialOptions, Dialer};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(feature = "grpc")]
use crate::transport::grpc::GrpcDialer;

/// Ingestion endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ingest.rask.dev:443";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of a session's inbound queue.
pub const DEFAULT_SESSION_BUFFER: usize = 100_000;

/// Stream count of a session created with [`ClientConfig::session_defaults`].
pub const DEFAULT_SESSION_STREAMS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: String,
    /// Bounds each dial and the stream setup.
    pub timeout: Duration,
    /// TLS is only used when the endpoint also implies the secure port.
    pub tls: bool,
    pub num_streams: usize,
    pub session_buffer: usize,
    pub stream_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            tls: true,
            num_streams: 1,
            session_buffer: DEFAULT_SESSION_BUFFER,
            stream_queue_capacity: PER_STREAM_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Defaults for the session API: several streams instead of one.
    pub fn session_defaults() -> Self {
        Self {
            num_streams: DEFAULT_SESSION_STREAMS,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_num_streams(mut self, num_streams: usize) -> Self {
        self.num_streams = num_streams;
        self
    }

    pub fn with_session_buffer(mut self, session_buffer: usize) -> Self {
        self.session_buffer = session_buffer;
        self
    }

    pub fn with_stream_queue_capacity(mut self, stream_queue_capacity: usize) -> Self {
        self.stream_queue_capacity = stream_queue_capacity;
        self
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.endpoint.trim().is_empty() {
            return Err(StreamError::InvalidConfig("endpoint is empty".to_string()));
        }
        if self.num_streams == 0 {
            return Err(StreamError::InvalidConfig(
                "num_streams must be at least 1".to_string(),
            ));
        }
        if self.session_buffer == 0 {
            return Err(StreamError::InvalidConfig(
                "session_buffer must be at least 1".to_string(),
            ));
        }
        if self.stream_queue_capacity == 0 {
            return Err(StreamError::InvalidConfig(
                "stream_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(StreamError::InvalidConfig("timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn is_secure(&self) -> bool {
        implies_tls(&self.endpoint, self.tls)
    }

    pub fn dial_options(&self) -> DialOptions {
        DialOptions {
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
            secure: self.is_secure(),
        }
    }
}

/// Low-level multi-stream client.
///
/// Owns the connection pool; each call to [`StreamClient::stream_events`] is
/// one distribution pass over the live connections.
#[derive(Debug)]
pub struct StreamClient<D: Dialer> {
    pool: ConnectionPool<D>,
    credential: Credential,
    config: ClientConfig,
}

impl<D: Dialer> StreamClient<D> {
    pub fn new(credential: Credential, config: ClientConfig, dialer: D) -> Result<Self, StreamError> {
        config.validate()?;
        let pool = ConnectionPool::new(dialer, config.dial_options(), config.num_streams);
        Ok(Self {
            pool,
            credential,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn connect(&self) -> Result<(), StreamError> {
        self.pool.connect().await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), StreamError> {
        self.pool.close().await
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.is_connected().await
    }

    pub async fn active_streams(&self) -> usize {
        self.pool.len().await
    }

    /// Streams events until `events` is closed and every worker has finished.
    ///
    /// Per-event failures are only reported through the returned stats.
    pub async fn stream_events(
        &self,
        events: mpsc::Receiver<Event>,
        cancel: CancellationToken,
    ) -> Result<StreamStats, StreamError> {
        let connections = self.pool.snapshot().await;
        if connections.is_empty() {
            return Err(StreamError::NotConnected);
        }

        let active_streams = connections.len();
        let started = Instant::now();
        let tally = Distributor::new(connections, self.credential.clone(), cancel)
            .with_queue_capacity(self.config.stream_queue_capacity)
            .with_open_timeout(self.config.timeout)
            .run(events)
            .await;

        let stats = StreamStats::from_tally(tally, started.elapsed(), active_streams);
        info!(
            sent = stats.total_sent,
            succeeded = stats.total_succeeded,
            failed = stats.total_failed,
            events_per_sec = stats.events_per_sec.round(),
            "Streaming pass complete"
        );
        Ok(stats)
    }

    /// Streams a fixed batch of events.
    pub async fn stream_events_slice(&self, events: Vec<Event>) -> Result<StreamStats, StreamError> {
        if !self.is_connected().await {
            return Err(StreamError::NotConnected);
        }

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers the whole batch, so this never waits
            if tx.send(event).await.is_err() {
                break;
            }
        }
        drop(tx);

        self.stream_events(rx, CancellationToken::new()).await
    }
}

#[cfg(feature = "grpc")]
impl StreamClient<GrpcDialer> {
    /// Client over the gRPC transport with default dialer settings.
    pub fn grpc(credential: Credential, config: ClientConfig) -> Result<Self, StreamError> {
        Self::new(credential, config, GrpcDialer::default())
    }
}
