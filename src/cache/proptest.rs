//! Property-Based Tests for the Write Path
//!
//! # Test Properties
//!
//! 1. **Last Write Wins**: after a flush, every key reads back the value of
//!    its most recent `set`, whatever the batch boundaries were
//! 2. **No Loss**: every accepted write is counted in exactly one flush

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use proptest::prelude::*;

use super::Cache;
use crate::config::CacheConfig;
use crate::storage::{InMemoryBackend, StorageBackend};

// =============================================================================
// Property Strategies
// =============================================================================

/// Writes over a small key space so that keys repeat within a batch.
fn writes_strategy() -> impl Strategy<Value = Vec<(u8, Vec<u8>)>> {
    prop::collection::vec((0u8..8, prop::collection::vec(any::<u8>(), 0..16)), 1..200)
}

fn config_for(batch_size: usize) -> CacheConfig {
    CacheConfig {
        batch_size,
        flush_interval_ms: 60_000,
        read_workers: 2,
        read_queue_capacity: 8,
        write_queue_capacity: 32,
        ..Default::default()
    }
}

// =============================================================================
// Write Path Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_last_write_wins(writes in writes_strategy(), batch_size in 1usize..50) {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Cache::with_backend(config_for(batch_size), backend.clone()).unwrap();

        let mut expected: HashMap<String, Vec<u8>> = HashMap::new();
        for (key, value) in &writes {
            let key = format!("key-{}", key);
            cache.set(key.clone(), Bytes::from(value.clone())).unwrap();
            expected.insert(key, value.clone());
        }
        cache.flush().unwrap();

        for (key, value) in &expected {
            let stored = cache.get(key.as_str()).unwrap();
            prop_assert_eq!(stored, Some(Bytes::from(value.clone())));
        }
        cache.close().unwrap();
    }

    #[test]
    fn prop_every_write_flushed_once(writes in writes_strategy(), batch_size in 1usize..50) {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Cache::with_backend(config_for(batch_size), backend.clone()).unwrap();

        for (key, value) in &writes {
            cache.set(format!("key-{}", key), Bytes::from(value.clone())).unwrap();
        }
        cache.close().unwrap();

        let stats = cache.stats();
        prop_assert_eq!(stats.sets_accepted, writes.len() as u64);
        prop_assert_eq!(stats.flushed_writes, writes.len() as u64);
        prop_assert_eq!(backend.stats().keys_written, writes.len() as u64);
        prop_assert!(stats.flushes >= (writes.len() / batch_size) as u64);
    }
}
