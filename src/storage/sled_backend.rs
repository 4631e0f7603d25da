//! Sled Storage Backend
//!
//! Embedded, durable engine. A cache batch maps onto one [`sled::Batch`],
//! which sled applies atomically.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tracing::{debug, info};

use super::{KeyValue, StorageBackend, StorageStats};
use crate::config::StorageConfig;
use crate::error::{Error, Result};

/// Storage backend over a sled database
pub struct SledBackend {
    db: sled::Db,
    config: StorageConfig,
    reads: AtomicU64,
    read_hits: AtomicU64,
    batches: AtomicU64,
    keys_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl SledBackend {
    /// Open (or create) the store described by `config`.
    ///
    /// sled has no knobs for thread-pool size or compaction target, so
    /// `parallelism` only selects the throughput-oriented mode and
    /// `compaction_target_bytes` is recorded for diagnostics.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        if !config.create_if_missing && !config.path.exists() {
            return Err(Error::NotFound(format!(
                "store {} does not exist and create_if_missing is false",
                config.path.display()
            )));
        }

        let mode = if config.parallelism > 1 {
            sled::Mode::HighThroughput
        } else {
            sled::Mode::LowSpace
        };

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity_bytes)
            .mode(mode)
            .open()?;

        info!(
            path = %config.path.display(),
            parallelism = config.parallelism,
            compaction_target_bytes = config.compaction_target_bytes,
            recovered = db.was_recovered(),
            "Storage engine opened"
        );

        Ok(Self {
            db,
            config: config.clone(),
            reads: AtomicU64::new(0),
            read_hits: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            keys_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        })
    }
}

impl StorageBackend for SledBackend {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let value = self.db.get(key.as_bytes())?;
        Ok(value.map(|ivec| {
            self.read_hits.fetch_add(1, Ordering::Relaxed);
            Bytes::copy_from_slice(&ivec)
        }))
    }

    fn write_batch(&self, pairs: &[KeyValue]) -> Result<()> {
        let mut batch = sled::Batch::default();
        let mut bytes = 0u64;
        for (key, value) in pairs {
            bytes += value.len() as u64;
            batch.insert(key.as_bytes(), &value[..]);
        }

        self.db.apply_batch(batch)?;

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.keys_written
            .fetch_add(pairs.len() as u64, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let flushed = self.db.flush()?;
        debug!(bytes = flushed, path = %self.config.path.display(), "Storage engine flushed");
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
