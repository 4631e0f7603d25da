//! Write Batcher - group commit of point writes
//!
//! A single dedicated thread owns the pending batch and is the only writer
//! to the storage engine. It waits on three sources at once:
//!
//! ```text
//!   write queue ──┐
//!                 │      ┌──────────────┐   count == batch_size   ┌──────────┐
//!   flush ticker ─┼────▶ │ PendingBatch │ ──────── or tick ─────▶ │ storage  │
//!                 │      └──────────────┘      (one atomic batch) └──────────┘
//!   shutdown ─────┘
//! ```
//!
//! The ticker keeps its period regardless of count-triggered flushes; a tick
//! with an empty batch does nothing.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, select, Receiver};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::stats::CacheStats;
use super::task::{WriteRequest, WriteTask};
use crate::error::{Error, Result};
use crate::storage::{KeyValue, StorageBackend};

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached the size threshold
    Count,
    /// The flush timer fired
    Timer,
    /// A caller requested a flush barrier
    Explicit,
    /// The cache is closing
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushTrigger::Count => write!(f, "count"),
            FlushTrigger::Timer => write!(f, "timer"),
            FlushTrigger::Explicit => write!(f, "explicit"),
            FlushTrigger::Shutdown => write!(f, "shutdown"),
        }
    }
}

// =============================================================================
// Pending Batch
// =============================================================================

/// Writes accepted but not yet flushed, in arrival order.
#[derive(Debug, Default)]
pub struct PendingBatch {
    entries: Vec<KeyValue>,
}

impl PendingBatch {
    /// Create an empty batch with room for `capacity` writes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a write.
    pub fn push(&mut self, task: WriteTask) {
        self.entries.push(task.into_pair());
    }

    /// Number of pending writes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending writes in arrival order
    pub fn entries(&self) -> &[KeyValue] {
        &self.entries
    }

    /// Empty the batch, keeping its allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// =============================================================================
// Write Batcher
// =============================================================================

/// Failure of a background flush, held until a caller can be told.
pub type FailureSlot = Arc<Mutex<Option<Error>>>;

/// The single writer.
pub struct WriteBatcher {
    storage: Arc<dyn StorageBackend>,
    batch: PendingBatch,
    batch_size: usize,
    flush_interval: Duration,
    stats: Arc<CacheStats>,
    failure: FailureSlot,
}

impl WriteBatcher {
    /// Create a batcher flushing every `batch_size` writes or `flush_interval`.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        batch_size: usize,
        flush_interval: Duration,
        stats: Arc<CacheStats>,
        failure: FailureSlot,
    ) -> Self {
        Self {
            storage,
            batch: PendingBatch::with_capacity(batch_size),
            batch_size,
            flush_interval,
            stats,
            failure,
        }
    }

    /// Start the batcher on its own thread.
    ///
    /// The thread exits when `shutdown` disconnects (after draining the
    /// queue) or when every producer of `requests` is gone.
    pub fn spawn(
        self,
        requests: Receiver<WriteRequest>,
        shutdown: Receiver<()>,
    ) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("stagecache-writer".into())
            .spawn(move || self.run(requests, shutdown))
            .map_err(|e| Error::Internal(format!("Failed to spawn write batcher: {}", e)))
    }

    fn run(mut self, requests: Receiver<WriteRequest>, shutdown: Receiver<()>) {
        info!(
            "Starting write batcher (batch_size={}, interval={:?})",
            self.batch_size, self.flush_interval
        );

        let ticker = channel::tick(self.flush_interval);

        loop {
            select! {
                recv(requests) -> request => match request {
                    Ok(request) => self.handle(request),
                    Err(_) => {
                        debug!("Write queue disconnected");
                        self.flush_and_record(FlushTrigger::Shutdown);
                        break;
                    }
                },
                recv(ticker) -> _ => {
                    if !self.batch.is_empty() {
                        self.flush_and_record(FlushTrigger::Timer);
                    }
                },
                recv(shutdown) -> _ => {
                    self.drain(&requests);
                    break;
                },
            }
        }

        info!("Write batcher stopped");
    }

    fn handle(&mut self, request: WriteRequest) {
        match request {
            WriteRequest::Put(task) => {
                self.batch.push(task);
                if self.batch.len() >= self.batch_size {
                    self.flush_and_record(FlushTrigger::Count);
                }
            }
            WriteRequest::Flush(reply) => {
                let result = self
                    .flush(FlushTrigger::Explicit)
                    .and_then(|()| match self.failure.lock().take() {
                        Some(earlier) => Err(earlier),
                        None => Ok(()),
                    });
                if reply.send(result).is_err() {
                    debug!("Flush requester went away before the reply");
                }
            }
        }
    }

    /// Process everything still queued, then flush what is left.
    fn drain(&mut self, requests: &Receiver<WriteRequest>) {
        let mut drained = 0usize;
        for request in requests.try_iter() {
            drained += 1;
            self.handle(request);
        }
        debug!("Drained {} queued write requests on shutdown", drained);
        self.flush_and_record(FlushTrigger::Shutdown);
    }

    /// Flush from a background trigger. A failure is parked by `flush`.
    fn flush_and_record(&mut self, trigger: FlushTrigger) {
        if self.flush(trigger).is_err() {
            debug!("Background flush failure parked for the next caller");
        }
    }

    /// Write the pending batch atomically and clear it.
    ///
    /// A failed batch is discarded: it is counted and the error returned,
    /// but its writes are not re-queued. Failures of background flushes are
    /// parked in the failure slot before they are counted.
    fn flush(&mut self, trigger: FlushTrigger) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let writes = self.batch.len();
        let start = Instant::now();
        let result = self.storage.write_batch(self.batch.entries());
        self.batch.clear();

        match result {
            Ok(()) => {
                let elapsed = start.elapsed();
                self.stats.record_flush(trigger, writes, elapsed);
                debug!(
                    "Flushed {} writes ({} trigger) in {:?}",
                    writes, trigger, elapsed
                );
                Ok(())
            }
            Err(e) => {
                if trigger != FlushTrigger::Explicit {
                    *self.failure.lock() = Some(e.clone());
                }
                self.stats.record_flush_failure(writes);
                error!(
                    kind = e.kind(),
                    "Flush of {} writes ({} trigger) failed, batch discarded: {}",
                    writes, trigger, e
                );
                Err(e)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
