//! Cache Facade - the public `set`/`get` surface
//!
//! [`Cache::open`] starts the write batcher and the read workers;
//! [`Cache::close`] (or dropping the cache) stops them, flushes every
//! accepted write and closes the storage engine.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, info, instrument, warn};

use super::batcher::{FailureSlot, WriteBatcher};
use super::queue::{Admission, TaskQueues};
use super::stats::{CacheStats, CacheStatsSnapshot};
use super::task::{ReadTask, WriteRequest, WriteTask};
use super::workers::ReadWorkerPool;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::storage::{RetryingBackend, SledBackend, StorageBackend, StorageStats};

/// Background threads owned by an open cache.
struct Background {
    /// Dropping this sender tells every thread to stop
    shutdown: Sender<()>,
    batcher: JoinHandle<()>,
    workers: ReadWorkerPool,
}

/// Write-behind cache over a storage engine.
///
/// `Cache` is `Send + Sync`; share it between threads with an `Arc`.
pub struct Cache {
    config: CacheConfig,
    storage: Arc<dyn StorageBackend>,
    queues: TaskQueues,
    stats: Arc<CacheStats>,
    write_failure: FailureSlot,
    background: Mutex<Option<Background>>,
}

impl Cache {
    /// Open the sled store described by `config.storage` and start the cache.
    ///
    /// Transient storage errors are retried according to `config.retry`.
    #[instrument(skip_all, fields(path = %config.storage.path.display()))]
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let engine = SledBackend::open(&config.storage)?;
        let storage = RetryingBackend::new(engine, config.retry.clone());
        Self::with_backend(config, Arc::new(storage))
    }

    /// Start the cache over an already opened backend.
    ///
    /// The backend is used as given; wrap it in a
    /// [`RetryingBackend`] to retry transient errors.
    pub fn with_backend(config: CacheConfig, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;

        let (queues, receivers) =
            TaskQueues::new(config.read_queue_capacity, config.write_queue_capacity);
        let (shutdown, shutdown_rx) = channel::bounded::<()>(0);
        let stats = Arc::new(CacheStats::new());
        let write_failure: FailureSlot = Arc::new(Mutex::new(None));

        let batcher = WriteBatcher::new(
            Arc::clone(&storage),
            config.batch_size,
            config.flush_interval(),
            Arc::clone(&stats),
            Arc::clone(&write_failure),
        )
        .spawn(receivers.writes, shutdown_rx.clone())?;

        let workers = ReadWorkerPool::spawn(
            config.read_workers,
            Arc::clone(&storage),
            receivers.reads,
            shutdown_rx,
            Arc::clone(&stats),
        )?;

        info!(
            "Cache started (batch_size={}, flush_interval={:?}, read_workers={})",
            config.batch_size,
            config.flush_interval(),
            workers.size()
        );

        Ok(Self {
            config,
            storage,
            queues,
            stats,
            write_failure,
            background: Mutex::new(Some(Background {
                shutdown,
                batcher,
                workers,
            })),
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Queue a write, waiting for space if the write queue is full.
    ///
    /// Returns once the write is accepted, not once it is durable. If an
    /// earlier background flush failed, that error is returned instead and
    /// this write is not queued.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Bytes>) -> Result<()> {
        self.enqueue_write(WriteTask::new(key, value), Admission::Block)
    }

    /// Queue a write without waiting; fails with `ResourceExhausted` when full.
    pub fn try_set(&self, key: impl Into<String>, value: impl Into<Bytes>) -> Result<()> {
        self.enqueue_write(WriteTask::new(key, value), Admission::Try)
    }

    /// Queue a write, waiting at most `timeout` for queue space.
    pub fn set_timeout(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<()> {
        self.enqueue_write(WriteTask::new(key, value), Admission::within(timeout))
    }

    fn enqueue_write(&self, task: WriteTask, admission: Admission) -> Result<()> {
        let earlier = self.write_failure.lock().take();
        let result = match earlier {
            Some(e) => Err(e),
            None => self.queues.push_write(WriteRequest::Put(task), admission),
        };

        match &result {
            Ok(()) => self.stats.record_set(),
            Err(_) => self.stats.record_set_rejected(),
        }
        result
    }

    /// Flush every write accepted before this call.
    ///
    /// Also reports a pending failure of an earlier background flush.
    #[instrument(skip(self))]
    pub fn flush(&self) -> Result<()> {
        let (reply, outcome) = channel::bounded(1);
        self.queues
            .push_write(WriteRequest::Flush(reply), Admission::Block)?;
        outcome.recv().map_err(|_| Error::Closed)?
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up `key`, waiting for queue space and for the answer.
    ///
    /// Returns `Ok(None)` if the key is absent. Writes still pending in
    /// the batcher are not visible.
    pub fn get(&self, key: impl Into<String>) -> Result<Option<Bytes>> {
        let (task, reply) = ReadTask::new(key.into());
        self.enqueue_read(task, Admission::Block)?;
        reply.recv().map_err(|_| Error::Closed)?
    }

    /// Look up `key` without waiting for queue space.
    ///
    /// Fails with `ResourceExhausted` if the read queue is full; once
    /// admitted, waits for the answer.
    pub fn try_get(&self, key: impl Into<String>) -> Result<Option<Bytes>> {
        let (task, reply) = ReadTask::new(key.into());
        self.enqueue_read(task, Admission::Try)?;
        reply.recv().map_err(|_| Error::Closed)?
    }

    /// Look up `key`, giving up after `timeout` (admission and answer).
    ///
    /// A timeout too large to express as a deadline waits without bound.
    pub fn get_timeout(&self, key: impl Into<String>, timeout: Duration) -> Result<Option<Bytes>> {
        let (task, reply) = ReadTask::new(key.into());
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.enqueue_read(task, Admission::Block)?;
            return reply.recv().map_err(|_| Error::Closed)?;
        };
        self.enqueue_read(task, Admission::Until { deadline, timeout })?;

        match reply.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }

    fn enqueue_read(&self, task: ReadTask, admission: Admission) -> Result<()> {
        let result = self.queues.push_read(task, admission);
        match &result {
            Ok(()) => self.stats.record_get(),
            Err(_) => self.stats.record_get_rejected(),
        }
        result
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the cache.
    ///
    /// Refuses new work, stops the read workers (queued lookups fail with
    /// `Closed`), drains the write queue, flushes the final batch and closes
    /// the storage engine. Calling `close` again is a no-op. A call made
    /// while another thread is closing waits for that close to finish and
    /// returns `Ok(())`; only the first caller sees a shutdown error.
    #[instrument(skip(self))]
    pub fn close(&self) -> Result<()> {
        // Held until shutdown completes so concurrent callers wait on it
        let mut running = self.background.lock();
        let Some(background) = running.take() else {
            return Ok(());
        };

        info!("Closing cache");
        self.queues.close();
        drop(background.shutdown);

        let mut outcome = Ok(());
        if background.batcher.join().is_err() {
            error!("Write batcher panicked");
            outcome = Err(Error::Internal("write batcher panicked".into()));
        }

        let panicked = background.workers.join();
        if panicked > 0 {
            error!("{} read workers panicked", panicked);
        }

        if let Some(e) = self.write_failure.lock().take() {
            outcome = outcome.and(Err(e));
        }

        let closed = self.storage.close();
        let outcome = outcome.and(closed);

        let stats = self.stats.snapshot();
        info!(
            "Cache closed ({} writes flushed in {} batches, {} lookups)",
            stats.flushed_writes, stats.flushes, stats.gets_accepted
        );
        outcome
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.queues.is_closed()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Configuration the cache was started with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Snapshot of cache statistics, including queue depths
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            pending_reads: self.queues.pending_reads() as u64,
            pending_writes: self.queues.pending_writes() as u64,
            ..self.stats.snapshot()
        }
    }

    /// Statistics reported by the storage engine
    pub fn storage_stats(&self) -> StorageStats {
        self.storage.stats()
    }

    /// Read tasks waiting for a worker
    pub fn pending_reads(&self) -> usize {
        self.queues.pending_reads()
    }

    /// Write requests waiting for the batcher
    pub fn pending_writes(&self) -> usize {
        self.queues.pending_writes()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error while closing cache on drop: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
