//! Cache Configuration
//!
//! Every tunable of the cache lives here. Values can be built in code,
//! loaded from a YAML or JSON file, and are checked by [`CacheConfig::validate`]
//! before any background thread is started.
//!
//! ```yaml
//! storage:
//!   path: /var/lib/stagecache
//!   parallelism: 16
//! batch_size: 100
//! flush_interval_ms: 1000
//! read_workers: 100
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::RetryPolicy;

// =============================================================================
// Constants
// =============================================================================

/// Writes accumulated before a batch is flushed
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Interval of the flush timer (milliseconds)
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Size of the read worker pool
pub const DEFAULT_READ_WORKERS: usize = 100;

/// Capacity of each task queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;

/// Parallelism hint for the storage engine
pub const DEFAULT_PARALLELISM: usize = 16;

/// Compaction target size (512 MiB)
pub const DEFAULT_COMPACTION_TARGET_BYTES: u64 = 512 * 1024 * 1024;

/// Page cache size handed to the storage engine (1 GiB)
pub const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024;

/// Default on-disk location of the store
pub const DEFAULT_STORAGE_PATH: &str = "/mnt/stagecache";

// =============================================================================
// Storage Configuration
// =============================================================================

/// Options passed to the storage engine when it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the store
    pub path: PathBuf,

    /// Worker hint for the engine's internal thread pool
    pub parallelism: usize,

    /// Target file/level size for level-style compaction
    pub compaction_target_bytes: u64,

    /// Create the store if the path does not exist
    pub create_if_missing: bool,

    /// In-memory page cache size for the engine
    pub cache_capacity_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
            parallelism: DEFAULT_PARALLELISM,
            compaction_target_bytes: DEFAULT_COMPACTION_TARGET_BYTES,
            create_if_missing: true,
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
        }
    }
}

impl StorageConfig {
    /// Storage options rooted at `path`, defaults otherwise.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config("storage.path must not be empty".into()));
        }
        if self.parallelism == 0 {
            return Err(Error::Config("storage.parallelism must be > 0".into()));
        }
        if self.compaction_target_bytes == 0 {
            return Err(Error::Config(
                "storage.compaction_target_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Configuration for the write-behind cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Storage engine options
    pub storage: StorageConfig,

    /// Number of writes that triggers a flush
    pub batch_size: usize,

    /// Flush timer period in milliseconds
    pub flush_interval_ms: u64,

    /// Number of read worker threads
    pub read_workers: usize,

    /// Capacity of the read task queue
    pub read_queue_capacity: usize,

    /// Capacity of the write task queue
    pub write_queue_capacity: usize,

    /// Retry policy for transient storage errors
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            read_workers: DEFAULT_READ_WORKERS,
            read_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Flush timer period
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;

        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config("flush_interval_ms must be > 0".into()));
        }
        if self.read_workers == 0 {
            return Err(Error::Config("read_workers must be > 0".into()));
        }
        if self.read_queue_capacity == 0 || self.write_queue_capacity == 0 {
            return Err(Error::Config("queue capacities must be > 0".into()));
        }
        self.retry.validate()
    }

    /// Load configuration from a YAML or JSON file.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as YAML.
    /// Missing fields fall back to their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&raw)
        } else {
            Self::from_yaml(&raw)
        }
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("Invalid YAML: {}", e)))
    }

    /// Parse configuration from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("Invalid JSON: {}", e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
