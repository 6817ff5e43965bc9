//! Per-listener ingestion counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated from listener tasks.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
    sink_failures: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages read off the transport.
    pub received: u64,
    /// Updates forwarded to the sink.
    pub accepted: u64,
    /// Credential mismatches.
    pub rejected: u64,
    /// Undecodable or structurally invalid payloads.
    pub malformed: u64,
    /// Sink refused or was closed.
    pub sink_failures: u64,
}

impl StatsSnapshot {
    /// Messages whose processing has finished, whatever the outcome.
    pub fn settled(&self) -> u64 {
        self.accepted + self.rejected + self.malformed + self.sink_failures
    }
}

impl IngestStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = IngestStats::default();
        stats.record_received();
        stats.record_received();
        stats.record_accepted();
        stats.record_malformed();

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.malformed, 1);
        assert_eq!(snap.settled(), 2);
    }
}
