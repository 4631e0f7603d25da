//! Retry with exponential backoff at the adapter boundary.
//!
//! Only transient errors ([`Error::is_transient`]) are retried. Corruption,
//! missing stores and the like are returned on the first attempt.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{KeyValue, StorageBackend, StorageStats};
use crate::error::{Error, Result};

/// Default retry attempts after the first failure
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff before the first retry (milliseconds)
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 50;

/// Upper bound for a single backoff (milliseconds)
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 1000;

/// Retry policy for transient storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt (0 disables retrying)
    pub max_retries: u32,

    /// Backoff before the first retry, doubled on every further retry
    pub initial_backoff_ms: u64,

    /// Cap on a single backoff
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(Error::Config(
                "retry.max_backoff_ms must be >= retry.initial_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    /// Backoff to wait before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run `op`, retrying transient failures with backoff.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let delay = self.backoff(retry);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        retry + 1,
                        self.max_retries + 1,
                        delay,
                        e
                    );
                    std::thread::sleep(delay);
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Backend decorator that retries transient errors.
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: StorageBackend> RetryingBackend<B> {
    /// Wrap `inner` with `policy`
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped backend
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: StorageBackend> StorageBackend for RetryingBackend<B> {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.policy.run("storage get", || self.inner.get(key))
    }

    fn write_batch(&self, pairs: &[KeyValue]) -> Result<()> {
        self.policy
            .run("storage write_batch", || self.inner.write_batch(pairs))
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn stats(&self) -> StorageStats {
        self.inner.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================
