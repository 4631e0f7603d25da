//! In-Memory Storage Backend
//!
//! Volatile engine for tests and benchmarks. Batches are applied under a
//! single write lock so that readers never observe half a batch.
//!
//! Faults can be injected to exercise the cache's error paths: failing
//! writes, failing reads, and per-key read latency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::{KeyValue, StorageBackend, StorageStats};
use crate::error::{Error, Result};

/// Queued failure for the next N calls
#[derive(Debug)]
struct Fault {
    remaining: u32,
    error: Error,
}

impl Fault {
    fn take(slot: &Mutex<Option<Fault>>) -> Option<Error> {
        let mut slot = slot.lock();
        let fault = slot.as_mut()?;
        let error = fault.error.clone();
        fault.remaining -= 1;
        if fault.remaining == 0 {
            *slot = None;
        }
        Some(error)
    }
}

/// In-memory backend for testing
pub struct InMemoryBackend {
    /// Storage (key -> value)
    data: RwLock<HashMap<String, Bytes>>,
    /// Artificial lookup latency per key
    read_delays: RwLock<HashMap<String, Duration>>,
    write_fault: Mutex<Option<Fault>>,
    read_fault: Mutex<Option<Fault>>,
    /// Statistics
    reads: AtomicU64,
    read_hits: AtomicU64,
    batches: AtomicU64,
    keys_written: AtomicU64,
    bytes_written: AtomicU64,
    closes: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            read_delays: RwLock::new(HashMap::new()),
            write_fault: Mutex::new(None),
            read_fault: Mutex::new(None),
            reads: AtomicU64::new(0),
            read_hits: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            keys_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        }
    }
}

impl InMemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` batch writes with `error`.
    pub fn fail_writes(&self, count: u32, error: Error) {
        if count > 0 {
            *self.write_fault.lock() = Some(Fault {
                remaining: count,
                error,
            });
        }
    }

    /// Fail the next `count` lookups with `error`.
    pub fn fail_reads(&self, count: u32, error: Error) {
        if count > 0 {
            *self.read_fault.lock() = Some(Fault {
                remaining: count,
                error,
            });
        }
    }

    /// Make every lookup of `key` sleep for `delay` before answering.
    pub fn delay_reads(&self, key: impl Into<String>, delay: Duration) {
        self.read_delays.write().insert(key.into(), delay);
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a value directly, bypassing statistics and faults
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        self.data.read().get(key).cloned()
    }

    /// How many times `close` has been called
    pub fn close_count(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let delay = self.read_delays.read().get(key).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if let Some(error) = Fault::take(&self.read_fault) {
            return Err(error);
        }

        let value = self.data.read().get(key).cloned();
        if value.is_some() {
            self.read_hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    fn write_batch(&self, pairs: &[KeyValue]) -> Result<()> {
        if let Some(error) = Fault::take(&self.write_fault) {
            return Err(error);
        }

        let mut bytes = 0u64;
        {
            let mut data = self.data.write();
            for (key, value) in pairs {
                bytes += value.len() as u64;
                data.insert(key.clone(), value.clone());
            }
        }

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.keys_written
            .fetch_add(pairs.len() as u64, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        StorageStats {
            reads: self.reads.load(Ordering::Relaxed),
            read_hits: self.read_hits.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            keys_written: self.keys_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
