use thiserror::Error;

/// Failures reported by a transport implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Dial to {endpoint} failed: {reason}")]
    Dial { endpoint: String, reason: String },

    #[error("Dial to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Credential cannot be attached to the call")]
    InvalidCredential,

    #[error("Failed to open stream: {0}")]
    StreamOpen(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Stream closed by remote")]
    StreamClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Close failed: {0}")]
    Close(String),
}

/// Fatal failure while establishing the connection pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to connect stream {index}: {source}")]
pub struct ConnectionError {
    pub index: usize,
    #[source]
    pub source: TransportError,
}

/// Top-level error type for the streaming engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Not connected, call connect() first")]
    NotConnected,

    #[error("Session not started")]
    NotStarted,

    #[error("Session already finalized")]
    SessionClosed,

    #[error("Failed to close connections: {0}")]
    Close(TransportError),

    #[error("Streaming pipeline aborted: {0}")]
    PipelineAborted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StreamError {
    /// Lifecycle violations are caller errors; retrying them never helps.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StreamError::NotConnected
                | StreamError::NotStarted
                | StreamError::SessionClosed
                | StreamError::InvalidConfig(_)
        )
    }
}
