//! stagecache Integration Tests
//!
//! Tests for the write-behind cache end to end:
//! - Feature 1: Grouped commits (count and timer triggers, ordering)
//! - Feature 2: Read worker pool (independence, absent keys, errors)
//! - Feature 3: Backpressure and lifecycle (admission, close, drop)
//! - Feature 4: Persistent storage (sled round-trip)

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use stagecache::{CacheConfig, Error};

/// Configuration with a small worker pool and a timer that will not fire
/// during a test unless the test asks for it.
fn test_config() -> CacheConfig {
    CacheConfig {
        flush_interval_ms: 60_000,
        read_workers: 4,
        read_queue_capacity: 64,
        write_queue_capacity: 64,
        ..Default::default()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// =============================================================================
// Feature 1: Grouped Commits
// =============================================================================

mod batching_tests {
    use super::*;
    use stagecache::{Cache, InMemoryBackend, StorageBackend};

    #[test]
    fn test_read_after_flush() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Cache::with_backend(test_config(), backend.clone()).unwrap();

        cache.set("a", "1").unwrap();
        cache.flush().unwrap();

        assert_eq!(cache.get("a").unwrap(), Some(Bytes::from_static(b"1")));
        cache.close().unwrap();
    }

    #[test]
    fn test_last_write_wins_within_batch() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Cache::with_backend(test_config(), backend.clone()).unwrap();

        cache.set("k", "v1").unwrap();
        cache.set("k", "v2").unwrap();
        cache.flush().unwrap();

        assert_eq!(backend.stats().batches, 1);
        assert_eq!(cache.get("k").unwrap(), Some(Bytes::from_static(b"v2")));
        cache.close().unwrap();
    }

    #[test]
    fn test_count_trigger_flushes_before_interval() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = CacheConfig {
            flush_interval_ms: 1000,
            ..test_config()
        };
        let cache = Cache::with_backend(config, backend.clone()).unwrap();

        let start = Instant::now();
        for i in 0..100 {
            cache.set(format!("key-{}", i), "v").unwrap();
        }

        assert!(wait_until(Duration::from_millis(800), || {
            backend.stats().batches == 1
        }));
        assert!(start.elapsed() < Duration::from_secs(1));

        let stats = cache.stats();
        assert_eq!(stats.count_flushes, 1);
        assert_eq!(stats.timer_flushes, 0);
        assert_eq!(backend.stats().keys_written, 100);
        assert_eq!(backend.len(), 100);

        cache.close().unwrap();
    }

    #[test]
    fn test_timer_trigger_flushes_single_write() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = CacheConfig {
            flush_interval_ms: 200,
            ..test_config()
        };
        let cache = Cache::with_backend(config, backend.clone()).unwrap();

        cache.set("lonely", "v").unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(backend.stats().batches, 0);

        assert!(wait_until(Duration::from_secs(1), || {
            backend.stats().batches == 1
        }));
        assert_eq!(backend.stats().keys_written, 1);
        assert_eq!(cache.stats().timer_flushes, 1);

        // Idle ticks do not produce empty flushes
        thread::sleep(Duration::from_millis(500));
        assert_eq!(backend.stats().batches, 1);

        cache.close().unwrap();
    }

    #[test]
    fn test_batches_applied_in_order() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = CacheConfig {
            batch_size: 3,
            ..test_config()
        };
        let cache = Cache::with_backend(config, backend.clone()).unwrap();

        for i in 0..10 {
            cache.set("counter", i.to_string()).unwrap();
        }
        cache.flush().unwrap();

        assert_eq!(backend.peek("counter"), Some(Bytes::from_static(b"9")));
        assert_eq!(cache.stats().count_flushes, 3);
        assert_eq!(cache.stats().explicit_flushes, 1);
        cache.close().unwrap();
    }
}

// =============================================================================
// Feature 2: Read Worker Pool
// =============================================================================

mod read_tests {
    use super::*;
    use stagecache::{Cache, InMemoryBackend, RetryPolicy, RetryingBackend, StorageBackend};

    #[test]
    fn test_absent_key_is_none() {
        let cache = Cache::with_backend(test_config(), Arc::new(InMemoryBackend::new())).unwrap();

        assert_eq!(cache.get("missing").unwrap(), None);
        assert_eq!(cache.stats().get_misses, 1);
        cache.close().unwrap();
    }

    #[test]
    fn test_slow_key_does_not_delay_fast_key() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.delay_reads("K1", Duration::from_millis(500));
        let cache = Arc::new(Cache::with_backend(test_config(), backend).unwrap());

        let slow_cache = Arc::clone(&cache);
        let slow = thread::spawn(move || slow_cache.get("K1"));
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        assert_eq!(cache.get("K2").unwrap(), None);
        assert!(start.elapsed() < Duration::from_millis(250));

        assert_eq!(slow.join().unwrap().unwrap(), None);
        cache.close().unwrap();
    }

    #[test]
    fn test_storage_error_reaches_caller() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_reads(1, Error::Corruption("bad block".into()));
        let cache = Cache::with_backend(test_config(), backend).unwrap();

        assert_eq!(
            cache.get("k"),
            Err(Error::Corruption("bad block".into()))
        );
        assert_eq!(cache.get("k"), Ok(None));
        assert_eq!(cache.stats().get_errors, 1);
        cache.close().unwrap();
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let backend = Arc::new(RetryingBackend::new(
            InMemoryBackend::new(),
            RetryPolicy {
                max_retries: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 4,
            },
        ));
        backend.inner().fail_writes(2, Error::Io("disk busy".into()));
        backend.inner().fail_reads(2, Error::Io("disk busy".into()));
        let cache = Cache::with_backend(test_config(), backend.clone()).unwrap();

        cache.set("k", "v").unwrap();
        cache.flush().unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(Bytes::from_static(b"v")));

        assert_eq!(cache.stats().flush_failures, 0);
        assert_eq!(backend.stats().keys_written, 1);
        cache.close().unwrap();
    }

    #[test]
    fn test_get_timeout_expires_on_slow_lookup() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.delay_reads("slow", Duration::from_millis(300));
        let cache = Cache::with_backend(test_config(), backend).unwrap();

        let timeout = Duration::from_millis(50);
        assert_eq!(cache.get_timeout("slow", timeout), Err(Error::Timeout(timeout)));
        assert_eq!(cache.get_timeout("fast", timeout), Ok(None));
        cache.close().unwrap();
    }
}

// =============================================================================
// Feature 3: Backpressure and Lifecycle
// =============================================================================

mod lifecycle_tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::{Condvar, Mutex};
    use stagecache::storage::KeyValue;
    use stagecache::{Cache, InMemoryBackend, Result, StorageBackend, StorageStats};

    /// Backend whose batch writes wait until the gate is opened.
    #[derive(Default)]
    struct GatedBackend {
        inner: InMemoryBackend,
        open: Mutex<bool>,
        opened: Condvar,
    }

    impl GatedBackend {
        fn open_gate(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }
    }

    impl StorageBackend for GatedBackend {
        fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.inner.get(key)
        }

        fn write_batch(&self, pairs: &[KeyValue]) -> Result<()> {
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            drop(open);
            self.inner.write_batch(pairs)
        }

        fn stats(&self) -> StorageStats {
            self.inner.stats()
        }
    }

    #[test]
    fn test_backpressure_without_loss() {
        let backend = Arc::new(GatedBackend::default());
        let config = CacheConfig {
            batch_size: 1,
            write_queue_capacity: 2,
            ..test_config()
        };
        let cache = Arc::new(Cache::with_backend(config, backend.clone()).unwrap());

        // The batcher takes the first write and blocks in the storage engine
        cache.set("w0", "v").unwrap();
        assert!(wait_until(Duration::from_secs(1), || cache.pending_writes() == 0));

        cache.set("w1", "v").unwrap();
        cache.set("w2", "v").unwrap();
        assert_eq!(cache.pending_writes(), 2);

        assert_matches!(cache.try_set("rejected", "v"), Err(Error::ResourceExhausted(_)));
        let timeout = Duration::from_millis(50);
        assert_eq!(
            cache.set_timeout("rejected", "v", timeout),
            Err(Error::Timeout(timeout))
        );

        let producer_cache = Arc::clone(&cache);
        let producer = thread::spawn(move || producer_cache.set("w3", "v"));
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        backend.open_gate();
        producer.join().unwrap().unwrap();
        cache.close().unwrap();

        let stats = cache.stats();
        assert_eq!(stats.sets_accepted, 4);
        assert_eq!(stats.sets_rejected, 2);
        assert_eq!(stats.flushed_writes, 4);
        for key in ["w0", "w1", "w2", "w3"] {
            assert!(backend.inner.peek(key).is_some(), "{} was lost", key);
        }
        assert!(backend.inner.peek("rejected").is_none());
    }

    #[test]
    fn test_close_drains_and_flushes() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Cache::with_backend(test_config(), backend.clone()).unwrap();

        for i in 0..42 {
            cache.set(format!("key-{}", i), "v").unwrap();
        }
        assert_eq!(backend.len(), 0);

        cache.close().unwrap();

        assert_eq!(backend.len(), 42);
        assert_eq!(cache.stats().shutdown_flushes, 1);
        assert_eq!(backend.close_count(), 1);
    }

    #[test]
    fn test_queued_reads_answered_on_close() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.delay_reads("slow", Duration::from_millis(200));
        let config = CacheConfig {
            read_workers: 1,
            ..test_config()
        };
        let cache = Arc::new(Cache::with_backend(config, backend).unwrap());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get("slow"))
            })
            .collect();
        assert!(wait_until(Duration::from_secs(1), || cache.pending_reads() == 3));

        cache.close().unwrap();

        let mut served = 0;
        let mut rejected = 0;
        for reader in readers {
            match reader.join().unwrap() {
                Ok(None) => served += 1,
                Err(Error::Closed) => rejected += 1,
                other => panic!("unexpected lookup outcome: {:?}", other),
            }
        }
        assert!(served >= 1);
        assert_eq!(served + rejected, 4);
        assert_eq!(cache.stats().get_misses, served);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Cache::with_backend(test_config(), backend.clone()).unwrap();
        cache.close().unwrap();

        assert!(cache.is_closed());
        assert_eq!(cache.set("k", "v"), Err(Error::Closed));
        assert_eq!(cache.try_set("k", "v"), Err(Error::Closed));
        assert_eq!(cache.get("k"), Err(Error::Closed));
        assert_eq!(cache.flush(), Err(Error::Closed));

        // Second close is a no-op
        cache.close().unwrap();
        assert_eq!(backend.close_count(), 1);
    }

    #[test]
    fn test_drop_closes_cache() {
        let backend = Arc::new(InMemoryBackend::new());
        {
            let cache = Cache::with_backend(test_config(), backend.clone()).unwrap();
            cache.set("k", "v").unwrap();
        }

        assert_eq!(backend.peek("k"), Some(Bytes::from_static(b"v")));
        assert_eq!(backend.close_count(), 1);
    }

    #[test]
    fn test_background_flush_failure_reported_once() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = CacheConfig {
            batch_size: 2,
            ..test_config()
        };
        let cache = Cache::with_backend(config, backend.clone()).unwrap();

        backend.fail_writes(1, Error::Io("disk full".into()));
        cache.set("a", "1").unwrap();
        cache.set("b", "2").unwrap();

        assert!(wait_until(Duration::from_secs(1), || {
            cache.stats().flush_failures == 1
        }));

        // The next write reports the failure and is not queued
        assert_eq!(cache.set("c", "3"), Err(Error::Io("disk full".into())));
        cache.set("d", "4").unwrap();
        cache.flush().unwrap();

        assert_eq!(cache.stats().discarded_writes, 2);
        assert!(backend.peek("a").is_none());
        assert!(backend.peek("c").is_none());
        assert_eq!(backend.peek("d"), Some(Bytes::from_static(b"4")));
        cache.close().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CacheConfig {
            batch_size: 0,
            ..test_config()
        };
        let result = Cache::with_backend(config, Arc::new(InMemoryBackend::new()));
        assert_matches!(result, Err(Error::Config(_)));
    }
}

// =============================================================================
// Feature 4: Persistent Storage
// =============================================================================

mod sled_tests {
    use super::*;
    use stagecache::{Cache, SledBackend, StorageConfig};

    fn sled_config(dir: &std::path::Path) -> CacheConfig {
        CacheConfig {
            storage: StorageConfig::at(dir.join("db")),
            ..test_config()
        }
    }

    #[test]
    fn test_round_trip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let cache = Cache::open(sled_config(dir.path())).unwrap();
        cache.set("persisted", "value").unwrap();
        cache.set("overwritten", "old").unwrap();
        cache.set("overwritten", "new").unwrap();
        cache.close().unwrap();
        drop(cache);

        let cache = Cache::open(sled_config(dir.path())).unwrap();
        assert_eq!(
            cache.get("persisted").unwrap(),
            Some(Bytes::from_static(b"value"))
        );
        assert_eq!(
            cache.get("overwritten").unwrap(),
            Some(Bytes::from_static(b"new"))
        );
        assert_eq!(cache.get("never-written").unwrap(), None);
        cache.close().unwrap();
    }

    #[test]
    fn test_missing_store_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sled_config(dir.path());
        config.storage.create_if_missing = false;

        assert!(matches!(Cache::open(config), Err(Error::NotFound(_))));
        assert!(matches!(
            SledBackend::open(&StorageConfig {
                create_if_missing: false,
                ..StorageConfig::at(dir.path().join("absent"))
            }),
            Err(Error::NotFound(_))
        ));
    }
}
