//! Storage Engine Adapter
//!
//! The cache treats the persistent key-value engine as an opaque collaborator
//! reached through three primitives: open, point lookup, and atomic batch
//! write.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         StorageBackend (trait)                           │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌────────────────────┐  │
//! │  │ SledBackend        │  │ InMemoryBackend    │  │ RetryingBackend<B> │  │
//! │  │ (embedded, durable)│  │ (tests, benches)   │  │ (backoff decorator)│  │
//! │  └────────────────────┘  └────────────────────┘  └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backends are responsible for their own thread-safety: the read workers
//! call [`StorageBackend::get`] concurrently while the batcher calls
//! [`StorageBackend::write_batch`], with no lock held above the handle.

mod memory;
mod retry;
mod sled_backend;

pub use memory::InMemoryBackend;
pub use retry::{RetryPolicy, RetryingBackend};
pub use sled_backend::SledBackend;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;

/// A key/value pair as handed to [`StorageBackend::write_batch`]
pub type KeyValue = (String, Bytes);

/// Storage engine trait
pub trait StorageBackend: Send + Sync {
    /// Point lookup. `Ok(None)` means the key is absent.
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Apply all pairs atomically, in order. The last write to a key wins.
    fn write_batch(&self, pairs: &[KeyValue]) -> Result<()>;

    /// Flush engine buffers and release resources
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Get storage statistics
    fn stats(&self) -> StorageStats;
}

/// Storage backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Point lookups served
    pub reads: u64,
    /// Lookups that found a value
    pub read_hits: u64,
    /// Batch writes applied
    pub batches: u64,
    /// Keys written across all batches
    pub keys_written: u64,
    /// Value bytes written across all batches
    pub bytes_written: u64,
}
