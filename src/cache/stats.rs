//! Cache Statistics
//!
//! Lock-free counters updated by callers, the batcher and the read workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use super::batcher::FlushTrigger;
use super::task::ReadReply;

/// Statistics for the write-behind cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Writes accepted onto the write queue
    pub sets_accepted: AtomicU64,

    /// Writes refused (closed, full, timed out, earlier flush failure)
    pub sets_rejected: AtomicU64,

    /// Lookups accepted onto the read queue
    pub gets_accepted: AtomicU64,

    /// Lookups refused at admission
    pub gets_rejected: AtomicU64,

    /// Lookups answered with a value
    pub get_hits: AtomicU64,

    /// Lookups answered with "absent"
    pub get_misses: AtomicU64,

    /// Lookups answered with a storage error
    pub get_errors: AtomicU64,

    /// Successful flushes, by trigger
    pub count_flushes: AtomicU64,
    pub timer_flushes: AtomicU64,
    pub explicit_flushes: AtomicU64,
    pub shutdown_flushes: AtomicU64,

    /// Writes persisted by successful flushes
    pub flushed_writes: AtomicU64,

    /// Flushes that failed after retries
    pub flush_failures: AtomicU64,

    /// Writes dropped with a failed flush
    pub discarded_writes: AtomicU64,

    /// Total flush time (microseconds)
    pub flush_time_us: AtomicU64,

    /// Total lookup time inside the storage engine (microseconds)
    pub read_time_us: AtomicU64,
}

impl CacheStats {
    /// Create a new statistics block
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted write.
    pub fn record_set(&self) {
        self.sets_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused write.
    pub fn record_set_rejected(&self) {
        self.sets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted lookup.
    pub fn record_get(&self) {
        self.gets_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused lookup.
    pub fn record_get_rejected(&self) {
        self.gets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup served by a worker.
    pub fn record_read(&self, reply: &ReadReply, duration: Duration) {
        let counter = match reply {
            Ok(Some(_)) => &self.get_hits,
            Ok(None) => &self.get_misses,
            Err(_) => &self.get_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.read_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a successful flush.
    pub fn record_flush(&self, trigger: FlushTrigger, writes: usize, duration: Duration) {
        let counter = match trigger {
            FlushTrigger::Count => &self.count_flushes,
            FlushTrigger::Timer => &self.timer_flushes,
            FlushTrigger::Explicit => &self.explicit_flushes,
            FlushTrigger::Shutdown => &self.shutdown_flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.flushed_writes
            .fetch_add(writes as u64, Ordering::Relaxed);
        self.flush_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a failed flush.
    pub fn record_flush_failure(&self, writes: usize) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        self.discarded_writes
            .fetch_add(writes as u64, Ordering::Relaxed);
    }

    /// Total successful flushes
    pub fn flushes(&self) -> u64 {
        self.count_flushes.load(Ordering::Relaxed)
            + self.timer_flushes.load(Ordering::Relaxed)
            + self.explicit_flushes.load(Ordering::Relaxed)
            + self.shutdown_flushes.load(Ordering::Relaxed)
    }

    /// Get average flush time in microseconds.
    pub fn avg_flush_time_us(&self) -> u64 {
        let flushes = self.flushes();
        if flushes == 0 {
            0
        } else {
            self.flush_time_us.load(Ordering::Relaxed) / flushes
        }
    }

    /// Get average lookup time in microseconds.
    pub fn avg_read_time_us(&self) -> u64 {
        let reads = self.get_hits.load(Ordering::Relaxed)
            + self.get_misses.load(Ordering::Relaxed)
            + self.get_errors.load(Ordering::Relaxed);
        if reads == 0 {
            0
        } else {
            self.read_time_us.load(Ordering::Relaxed) / reads
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            sets_accepted: self.sets_accepted.load(Ordering::Relaxed),
            sets_rejected: self.sets_rejected.load(Ordering::Relaxed),
            gets_accepted: self.gets_accepted.load(Ordering::Relaxed),
            gets_rejected: self.gets_rejected.load(Ordering::Relaxed),
            get_hits: self.get_hits.load(Ordering::Relaxed),
            get_misses: self.get_misses.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
            flushes: self.flushes(),
            count_flushes: self.count_flushes.load(Ordering::Relaxed),
            timer_flushes: self.timer_flushes.load(Ordering::Relaxed),
            explicit_flushes: self.explicit_flushes.load(Ordering::Relaxed),
            shutdown_flushes: self.shutdown_flushes.load(Ordering::Relaxed),
            flushed_writes: self.flushed_writes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            discarded_writes: self.discarded_writes.load(Ordering::Relaxed),
            avg_flush_time_us: self.avg_flush_time_us(),
            avg_read_time_us: self.avg_read_time_us(),
            pending_reads: 0,
            pending_writes: 0,
        }
    }
}

/// Snapshot of [`CacheStats`] plus queue depths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub sets_accepted: u64,
    pub sets_rejected: u64,
    pub gets_accepted: u64,
    pub gets_rejected: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub get_errors: u64,
    pub flushes: u64,
    pub count_flushes: u64,
    pub timer_flushes: u64,
    pub explicit_flushes: u64,
    pub shutdown_flushes: u64,
    pub flushed_writes: u64,
    pub flush_failures: u64,
    pub discarded_writes: u64,
    pub avg_flush_time_us: u64,
    pub avg_read_time_us: u64,
    /// Read tasks waiting for a worker
    pub pending_reads: u64,
    /// Write requests waiting for the batcher
    pub pending_writes: u64,
}

// =============================================================================
// Tests
// =============================================================================
