//! Pipeline statistics
//!
//! Thread-safe counters updated by the network side and the DAP worker.
//! Shared through an `Arc`; reads go through [`PipelineStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the command pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    requests_queued: AtomicU64,
    responses_produced: AtomicU64,
    fast_path_deliveries: AtomicU64,
    empty_polls: AtomicU64,
    consistency_faults: AtomicU64,
    restarts: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStatsSnapshot {
    /// Request packets accepted from the host
    pub requests_queued: u64,
    /// Response packets produced by the worker
    pub responses_produced: u64,
    /// Responses delivered through the fast path
    pub fast_path_deliveries: u64,
    /// Polls answered with an empty reply because nothing was pending
    pub empty_polls: u64,
    /// Polls where the counter was positive but no response arrived in time
    pub consistency_faults: u64,
    /// Queue pair recreations
    pub restarts: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self) {
        self.responses_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fast_path(&self) {
        self.fast_path_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fault(&self) {
        self.consistency_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            requests_queued: self.requests_queued.load(Ordering::Relaxed),
            responses_produced: self.responses_produced.load(Ordering::Relaxed),
            fast_path_deliveries: self.fast_path_deliveries.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            consistency_faults: self.consistency_faults.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

impl PipelineStatsSnapshot {
    /// Responses produced but not delivered through the fast path
    pub fn undelivered(&self) -> u64 {
        self.responses_produced
            .saturating_sub(self.fast_path_deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_from_threads() {
        let stats = Arc::new(PipelineStats::new());

        let worker_stats = stats.clone();
        let handle = std::thread::spawn(move || {
            for _ in 0..10 {
                worker_stats.record_response();
            }
        });
        for _ in 0..10 {
            stats.record_request();
        }
        handle.join().unwrap();

        stats.record_fast_path();
        let snap = stats.snapshot();
        assert_eq!(snap.requests_queued, 10);
        assert_eq!(snap.responses_produced, 10);
        assert_eq!(snap.undelivered(), 9);
    }
}
