//! Narrow interfaces to the remote ingestion service.
//!
//! The engine only ever sees these traits; the wire protocol lives behind
//! them. [`grpc`] is the production implementation, [`memory`] an in-process
//! loopback used by tests, benches and dry runs.

#[cfg(feature = "grpc")]
pub mod grpc;
pub mod memory;
pub mod wire;

use crate::domain::TransportError;
use std::fmt;
use std::future::Future;
use std::time::Duration;

pub use wire::{AckRecord, EventRecord, Metadata, WireTimestamp};

/// API key attached to every streaming call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self(api_key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Parameters for establishing one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialOptions {
    pub endpoint: String,
    pub timeout: Duration,
    pub secure: bool,
}

/// Opens connections to one endpoint.
pub trait Dialer: fmt::Debug + Send + Sync + 'static {
    type Connection: Connection;

    fn dial(
        &self,
        options: &DialOptions,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// One live transport connection. Cloning yields another handle to the same
/// connection, never a new one.
pub trait Connection: Clone + fmt::Debug + Send + Sync + 'static {
    type Sink: EventSink;
    type Acks: AckStream;

    /// Opens the duplex event stream, attaching the credential to the call.
    fn open_stream(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<(Self::Sink, Self::Acks), TransportError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Send half of a duplex stream.
pub trait EventSink: fmt::Debug + Send + 'static {
    fn send(
        &mut self,
        record: EventRecord,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Half-close: no more events will follow. Acks may still arrive.
    fn close_send(&mut self) -> impl Future<Output = ()> + Send;
}

/// Receive half of a duplex stream.
pub trait AckStream: fmt::Debug + Send + 'static {
    /// `None` once the remote side has ended the stream.
    fn next_ack(&mut self) -> impl Future<Output = Option<Result<AckRecord, TransportError>>> + Send;
}

/// Decides whether a connection should use TLS.
///
/// An explicit scheme wins; otherwise only the secure port implies TLS.
pub fn implies_tls(endpoint: &str, tls_enabled: bool) -> bool {
    if !tls_enabled {
        return false;
    }
    if endpoint.starts_with("https://") {
        return true;
    }
    if endpoint.starts_with("http://") {
        return false;
    }
    endpoint.ends_with(":443") || endpoint.contains(":443/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_follows_secure_port() {
        assert!(implies_tls("ingest.example.com:443", true));
        assert!(!implies_tls("ingest.example.com:443", false));
        assert!(!implies_tls("localhost:50051", true));
        assert!(!implies_tls("localhost:4430", true));
    }

    #[test]
    fn test_tls_follows_explicit_scheme() {
        assert!(implies_tls("https://ingest.example.com", true));
        assert!(!implies_tls("http://ingest.example.com:443", true));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.expose(), "super-secret");
    }
}
