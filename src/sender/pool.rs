use crate::domain::{ConnectionError, StreamError, TransportError};
use crate::transport::{Connection, DialOptions, Dialer};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Owns `num_streams` independent connections to one endpoint.
///
/// The connection list only changes under the write lock, during `connect`
/// and `close`.
#[derive(Debug)]
pub struct ConnectionPool<D: Dialer> {
    dialer: D,
    options: DialOptions,
    num_streams: usize,
    connections: RwLock<Vec<D::Connection>>,
}

impl<D: Dialer> ConnectionPool<D> {
    pub fn new(dialer: D, options: DialOptions, num_streams: usize) -> Self {
        Self {
            dialer,
            options,
            num_streams,
            connections: RwLock::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &DialOptions {
        &self.options
    }

    pub fn num_streams(&self) -> usize {
        self.num_streams
    }

    /// Dials every connection in order.
    ///
    /// Connections left from an earlier call are closed first. On failure the
    /// connections opened so far are closed again before the error is returned.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut connections = self.connections.write().await;

        if !connections.is_empty() {
            debug!(count = connections.len(), "Closing previous connections before reconnect");
            if let Err(e) = close_all(connections.drain(..)).await {
                warn!(error = %e, "Failed to close previous connection");
            }
        }

        let mut opened = Vec::with_capacity(self.num_streams);
        for index in 0..self.num_streams {
            match self.dial_one().await {
                Ok(connection) => opened.push(connection),
                Err(source) => {
                    if let Err(e) = close_all(opened).await {
                        warn!(error = %e, "Failed to close connection during connect rollback");
                    }
                    return Err(ConnectionError { index, source });
                }
            }
        }

        info!(
            endpoint = %self.options.endpoint,
            streams = opened.len(),
            secure = self.options.secure,
            "Connection pool established"
        );
        *connections = opened;
        Ok(())
    }

    async fn dial_one(&self) -> Result<D::Connection, TransportError> {
        tokio::time::timeout(self.options.timeout, self.dialer.dial(&self.options))
            .await
            .map_err(|_| TransportError::Timeout {
                endpoint: self.options.endpoint.clone(),
                timeout_ms: self.options.timeout.as_millis() as u64,
            })?
    }

    /// Closes every live connection, returning the first error seen.
    pub async fn close(&self) -> Result<(), StreamError> {
        let mut connections = self.connections.write().await;
        let count = connections.len();
        let result = close_all(connections.drain(..)).await;
        if count > 0 {
            debug!(count, "Connection pool closed");
        }
        result.map_err(StreamError::Close)
    }

    /// Handles to the live connections, in pool order.
    pub async fn snapshot(&self) -> Vec<D::Connection> {
        self.connections.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_connected(&self) -> bool {
        !self.connections.read().await.is_empty()
    }
}

/// Closes every connection even when an earlier one fails.
async fn close_all<C: Connection>(
    connections: impl IntoIterator<Item = C>,
) -> Result<(), TransportError> {
    let mut first_error = None;
    for connection in connections {
        if let Err(e) = connection.close().await {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryDialer;
    use std::time::Duration;

    fn options() -> DialOptions {
        DialOptions {
            endpoint: "memory:0".to_string(),
            timeout: Duration::from_secs(1),
            secure: false,
        }
    }

    #[tokio::test]
    async fn test_connect_opens_requested_streams() {
        let dialer = MemoryDialer::new();
        let pool = ConnectionPool::new(dialer.clone(), options(), 3);

        pool.connect().await.unwrap();
        assert_eq!(pool.len().await, 3);
        assert_eq!(dialer.dial_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_dial_rolls_back_opened_connections() {
        let dialer = MemoryDialer::new().fail_dial_at(2);
        let pool = ConnectionPool::new(dialer.clone(), options(), 4);

        let err = pool.connect().await.unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(dialer.closed_count(), 2);
        assert!(!pool.is_connected().await);
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_connections() {
        let dialer = MemoryDialer::new();
        let pool = ConnectionPool::new(dialer.clone(), options(), 2);

        pool.connect().await.unwrap();
        pool.connect().await.unwrap();
        assert_eq!(dialer.dial_count(), 4);
        assert_eq!(dialer.closed_count(), 2);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_close_empties_pool() {
        let dialer = MemoryDialer::new();
        let pool = ConnectionPool::new(dialer.clone(), options(), 2);

        pool.connect().await.unwrap();
        pool.close().await.unwrap();
        assert_eq!(dialer.closed_count(), 2);
        assert!(!pool.is_connected().await);

        // Closing an empty pool is fine
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_attempts_every_connection_and_reports_first_error() {
        let dialer = MemoryDialer::new().fail_close_at(1);
        let pool = ConnectionPool::new(dialer.clone(), options(), 3);

        pool.connect().await.unwrap();
        let err = pool.close().await.unwrap_err();
        assert!(
            matches!(err, StreamError::Close(TransportError::Close(ref reason)) if reason.contains("connection 1")),
            "{err:?}"
        );
        assert_eq!(dialer.closed_count(), 3);
        assert!(!pool.is_connected().await);
    }

    #[tokio::test]
    async fn test_rollback_keeps_closing_after_a_failed_close() {
        let dialer = MemoryDialer::new().fail_dial_at(3).fail_close_at(0);
        let pool = ConnectionPool::new(dialer.clone(), options(), 4);

        let err = pool.connect().await.unwrap_err();
        assert_eq!(err.index, 3);
        // The dial failure wins over the rollback's close failure
        assert!(matches!(err.source, TransportError::Dial { .. }), "{err:?}");
        assert_eq!(dialer.closed_count(), 3);
        assert!(!pool.is_connected().await);
    }
}
