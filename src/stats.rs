//! Processing statistics tracker
//!
//! Every batch or pipeline run owns its own [`StatsTracker`]. All counters
//! live behind one lock so a snapshot never observes a half-applied update.

use crate::common::ProcessingStats;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Counters {
    processed_chunks: usize,
    total_bytes: u64,
    processing_time: Duration,
    errors: usize,
    start_time: Instant,
}

impl Counters {
    fn fresh() -> Self {
        Self {
            processed_chunks: 0,
            total_bytes: 0,
            processing_time: Duration::ZERO,
            errors: 0,
            start_time: Instant::now(),
        }
    }
}

/// Mutable counters for one run
#[derive(Debug)]
pub struct StatsTracker {
    counters: Mutex<Counters>,
}

impl StatsTracker {
    /// Create a tracker whose start time is now
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::fresh()),
        }
    }

    /// Create a shared tracker
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters stay consistent even if a holder panicked: every update
        // is applied in full while the guard is held.
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Zero all counters and restart the clock
    pub fn reset(&self) {
        *self.lock() = Counters::fresh();
    }

    /// Record a unit whose processor produced a result
    pub fn record_success(&self, bytes: usize, elapsed: Duration) {
        let mut c = self.lock();
        c.processed_chunks += 1;
        c.total_bytes += bytes as u64;
        c.processing_time += elapsed;
    }

    /// Record a unit that failed, timed out or panicked
    pub fn record_failure(&self, elapsed: Duration) {
        let mut c = self.lock();
        c.processed_chunks += 1;
        c.errors += 1;
        c.processing_time += elapsed;
    }

    /// Take a consistent copy of the counters
    pub fn snapshot(&self) -> ProcessingStats {
        let c = self.lock();
        ProcessingStats {
            processed_chunks: c.processed_chunks,
            total_bytes: c.total_bytes,
            processing_time: c.processing_time,
            errors: c.errors,
            start_time: c.start_time,
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a tracker, safe to hand to observers of a running job
#[derive(Debug, Clone)]
pub struct StatsHandle {
    tracker: Arc<StatsTracker>,
}

impl StatsHandle {
    pub(crate) fn new(tracker: Arc<StatsTracker>) -> Self {
        Self { tracker }
    }

    /// Current statistics
    pub fn snapshot(&self) -> ProcessingStats {
        self.tracker.snapshot()
    }
}
