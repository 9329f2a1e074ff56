use super::stats::StreamStats;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

/// Prometheus counters for finalized sessions.
///
/// Counters move once per session, when its statistics are final, never while
/// events are still in flight.
#[derive(Clone)]
pub struct StreamMetrics {
    registry: Registry,
    sessions: IntCounter,
    events_sent: IntCounter,
    events_succeeded: IntCounter,
    events_failed: IntCounter,
    events_dropped: IntCounter,
    active_streams: IntGauge,
}

impl fmt::Debug for StreamMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamMetrics")
            .field("sessions", &self.sessions.get())
            .field("events_sent", &self.events_sent.get())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl StreamMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Registers the stream metrics on an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let sessions = counter(
            &registry,
            "rask_stream_sessions_total",
            "Total number of finalized streaming sessions",
        )?;
        let events_sent = counter(
            &registry,
            "rask_stream_events_sent_total",
            "Total number of events handed to a stream",
        )?;
        let events_succeeded = counter(
            &registry,
            "rask_stream_events_succeeded_total",
            "Total number of events reported as succeeded",
        )?;
        let events_failed = counter(
            &registry,
            "rask_stream_events_failed_total",
            "Total number of events reported as failed",
        )?;
        let events_dropped = counter(
            &registry,
            "rask_stream_events_dropped_total",
            "Total number of events dropped on a full session buffer",
        )?;

        let active_streams = IntGauge::with_opts(Opts::new(
            "rask_stream_active_streams",
            "Streams used by the most recent session",
        ))?;
        registry.register(Box::new(active_streams.clone()))?;

        Ok(Self {
            registry,
            sessions,
            events_sent,
            events_succeeded,
            events_failed,
            events_dropped,
            active_streams,
        })
    }

    pub fn record(&self, stats: &StreamStats) {
        self.sessions.inc();
        self.events_sent.inc_by(stats.total_sent);
        self.events_succeeded.inc_by(stats.total_succeeded);
        self.events_failed.inc_by(stats.total_failed);
        self.events_dropped.inc_by(stats.total_dropped);
        self.active_streams.set(stats.active_streams as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
