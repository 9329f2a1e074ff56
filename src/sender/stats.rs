// Stream statistics: per-worker tallies, lock-free fan-in counters and the
// public stats surface returned at finalize.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters one stream worker reports when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTally {
    pub sent: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl StreamTally {
    pub fn new(sent: u64, succeeded: u64, failed: u64) -> Self {
        Self {
            sent,
            succeeded,
            failed,
        }
    }
}

/// Lock-free accumulation of worker tallies.
///
/// Workers add into it as they finish; it is only read after every worker has
/// been joined.
#[derive(Debug, Default)]
pub struct AtomicStreamCounters {
    sent: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl AtomicStreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tally: StreamTally) {
        self.sent.fetch_add(tally.sent, Ordering::Relaxed);
        self.succeeded.fetch_add(tally.succeeded, Ordering::Relaxed);
        self.failed.fetch_add(tally.failed, Ordering::Relaxed);
    }

    /// Counts an event that never reached a worker.
    pub fn record_undeliverable(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamTally {
        StreamTally::new(
            self.sent.load(Ordering::Relaxed),
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Final statistics of one streaming pass or session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub total_sent: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_dropped: u64,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub duration: Duration,
    pub events_per_sec: f64,
    pub active_streams: usize,
}

impl StreamStats {
    pub fn from_tally(tally: StreamTally, duration: Duration, active_streams: usize) -> Self {
        let seconds = duration.as_secs_f64();
        let events_per_sec = if seconds > 0.0 {
            tally.sent as f64 / seconds
        } else {
            0.0
        };

        Self {
            total_sent: tally.sent,
            total_succeeded: tally.succeeded,
            total_failed: tally.failed,
            total_dropped: 0,
            duration,
            events_per_sec,
            active_streams,
        }
    }

    /// Fraction of sent events reported as succeeded (1.0 when nothing was sent).
    pub fn success_rate(&self) -> f64 {
        if self.total_sent == 0 {
            return 1.0;
        }
        self.total_succeeded as f64 / self.total_sent as f64
    }

    /// True when every sent event is accounted for as succeeded or failed.
    pub fn is_conserved(&self) -> bool {
        self.total_succeeded + self.total_failed == self.total_sent
    }
}
