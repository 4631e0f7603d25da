//! stagecache - Write-Behind Cache over an Embedded Key-Value Store
//!
//! Absorbs bursts of point writes and point reads in front of a persistent
//! storage engine. Writes are coalesced into grouped commits by a single
//! writer thread; reads fan out across a bounded pool of worker threads.
//!
//! # Architecture
//!
//! ```text
//! Cache (facade) → Task Queues → Write Batcher / Read Workers → StorageBackend
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stagecache::{Cache, CacheConfig, StorageConfig};
//!
//! let config = CacheConfig {
//!     storage: StorageConfig::at("/var/lib/stagecache"),
//!     ..Default::default()
//! };
//! let cache = Cache::open(config)?;
//! cache.set("user:1", "alice")?;
//! cache.flush()?;
//! assert_eq!(cache.get("user:1")?.as_deref(), Some(&b"alice"[..]));
//! cache.close()?;
//! # Ok::<(), stagecache::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Queues, write batcher, read worker pool and the facade
//! - [`config`] - Typed configuration with validation and file loading
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus exposition of cache statistics
//! - [`storage`] - Storage engine trait, sled and in-memory engines, retries

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;

// Re-export commonly used types
pub use cache::{Cache, CacheStatsSnapshot, FlushTrigger};
pub use config::{CacheConfig, StorageConfig};
pub use error::{Error, Result};
pub use storage::{
    InMemoryBackend, RetryPolicy, RetryingBackend, SledBackend, StorageBackend, StorageStats,
};

/// Crate version, as reported by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
