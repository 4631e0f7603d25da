//! Read Worker Pool
//!
//! A fixed set of threads competing for read tasks on one shared queue.
//! Each worker performs a synchronous lookup and answers on the task's
//! private reply channel, so a slow key only ever occupies one worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{select, Receiver};
use tracing::{debug, info, warn};

use super::stats::CacheStats;
use super::task::ReadTask;
use crate::error::{Error, Result};
use crate::storage::StorageBackend;

/// Handles of the running read workers.
pub struct ReadWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl ReadWorkerPool {
    /// Start `size` workers.
    ///
    /// Workers exit when `shutdown` disconnects or the read queue loses all
    /// its producers. If spawning fails part way, the error is returned and
    /// already started workers exit once `shutdown` is dropped by the caller.
    pub fn spawn(
        size: usize,
        storage: Arc<dyn StorageBackend>,
        tasks: Receiver<ReadTask>,
        shutdown: Receiver<()>,
        stats: Arc<CacheStats>,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(size);

        for id in 0..size {
            let worker = Worker {
                id,
                storage: Arc::clone(&storage),
                tasks: tasks.clone(),
                shutdown: shutdown.clone(),
                stats: Arc::clone(&stats),
            };
            let handle = thread::Builder::new()
                .name(format!("stagecache-reader-{}", id))
                .spawn(move || worker.run())
                .map_err(|e| {
                    Error::Internal(format!("Failed to spawn read worker {}: {}", id, e))
                })?;
            handles.push(handle);
        }

        info!("Started {} read workers", size);
        Ok(Self { handles })
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Returns how many panicked.
    pub fn join(self) -> usize {
        let mut panicked = 0;
        for handle in self.handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        panicked
    }
}

struct Worker {
    id: usize,
    storage: Arc<dyn StorageBackend>,
    tasks: Receiver<ReadTask>,
    shutdown: Receiver<()>,
    stats: Arc<CacheStats>,
}

impl Worker {
    fn run(self) {
        loop {
            select! {
                recv(self.tasks) -> task => match task {
                    Ok(task) => self.serve(task),
                    Err(_) => break,
                },
                recv(self.shutdown) -> _ => {
                    self.reject_queued();
                    break;
                },
            }
        }
        debug!(worker = self.id, "Read worker stopped");
    }

    fn serve(&self, task: ReadTask) {
        let start = Instant::now();
        let reply = self.storage.get(&task.key);
        self.stats.record_read(&reply, start.elapsed());

        if let Err(e) = &reply {
            warn!(worker = self.id, key = %task.key, kind = e.kind(), "Lookup failed: {}", e);
        }
        if !task.respond(reply) {
            debug!(worker = self.id, "Reader stopped waiting before the reply");
        }
    }

    /// Answer tasks that will never be served.
    fn reject_queued(&self) {
        for task in self.tasks.try_iter() {
            task.respond(Err(Error::Closed));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
