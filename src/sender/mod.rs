//! Multi-stream event distribution engine.
//!
//! - `pool`: owns the transport connections
//! - `worker`: drives one duplex stream and reconciles its counters
//! - `distributor`: round-robin fan-out and result fan-in
//! - `client`: low-level client over one pool
//! - `session`: start/submit/finalize lifecycle with a bounded buffer

pub mod client;
pub mod distributor;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pool;
pub mod session;
pub mod stats;
pub mod worker;

pub use client::{
    ClientConfig, DEFAULT_ENDPOINT, DEFAULT_SESSION_BUFFER, DEFAULT_SESSION_STREAMS,
    DEFAULT_TIMEOUT, StreamClient,
};
pub use distributor::{Distributor, PER_STREAM_QUEUE_CAPACITY};
#[cfg(feature = "metrics")]
pub use metrics::{MetricsError, StreamMetrics};
pub use pool::ConnectionPool;
pub use session::Session;
pub use stats::{AtomicStreamCounters, StreamStats, StreamTally};
pub use worker::{StreamWorker, reconcile};
