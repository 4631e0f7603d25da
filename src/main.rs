//! stagecache CLI
//!
//! One-shot `put`/`get` against a store and a `bench` load generator.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          stagecache                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  put / get   │───▶│    Cache     │───▶│ sled / memory│       │
//! │  │    bench     │    │  (threads)   │    │   backend    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │         │                   │                                   │
//! │         ▼                   ▼                                   │
//! │     summary           /metrics (hyper)                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stagecache::metrics::{self, StatsSource};
use stagecache::{
    Cache, CacheConfig, CacheStatsSnapshot, Error, InMemoryBackend, Result, StorageStats, VERSION,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// stagecache - Write-behind cache over an embedded key-value store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML, or JSON with a .json extension)
    #[arg(long, global = true, env = "STAGECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory, overrides the configuration file
    #[arg(long, global = true, env = "STAGECACHE_PATH")]
    path: Option<PathBuf>,

    /// Writes per flush, overrides the configuration file
    #[arg(long, global = true, env = "STAGECACHE_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Flush interval in milliseconds, overrides the configuration file
    #[arg(long, global = true, env = "STAGECACHE_FLUSH_INTERVAL_MS")]
    flush_interval_ms: Option<u64>,

    /// Read worker threads, overrides the configuration file
    #[arg(long, global = true, env = "STAGECACHE_READ_WORKERS")]
    read_workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a value and flush it before exiting
    Put {
        key: String,
        value: String,
    },
    /// Print the value stored under a key; exits with 1 when absent
    Get {
        key: String,
    },
    /// Run a concurrent read/write load against the cache
    Bench(BenchArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct BenchArgs {
    /// Writer threads
    #[arg(long, default_value = "4")]
    writers: usize,

    /// Reader threads
    #[arg(long, default_value = "4")]
    readers: usize,

    /// Operations per thread
    #[arg(long, default_value = "10000")]
    ops: usize,

    /// Number of distinct keys
    #[arg(long, default_value = "1000")]
    key_space: usize,

    /// Value size in bytes
    #[arg(long, default_value = "128")]
    value_size: usize,

    /// Use the in-memory engine instead of sled
    #[arg(long)]
    in_memory: bool,

    /// Serve /metrics on this address while the benchmark runs
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);
    info!("stagecache {}", VERSION);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;

    match args.command {
        Command::Put { key, value } => {
            blocking(move || {
                let cache = Cache::open(config)?;
                cache.set(key, value)?;
                cache.close()?;
                Ok(ExitCode::SUCCESS)
            })
            .await
        }
        Command::Get { key } => {
            blocking(move || {
                let cache = Cache::open(config)?;
                let value = cache.get(key)?;
                cache.close()?;
                Ok(match value {
                    Some(value) => {
                        println!("{}", String::from_utf8_lossy(&value));
                        ExitCode::SUCCESS
                    }
                    None => {
                        println!("(absent)");
                        ExitCode::from(1)
                    }
                })
            })
            .await
        }
        Command::Bench(bench) => run_bench(config, bench).await,
    }
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::default(),
    };

    if let Some(path) = &args.path {
        config.storage.path = path.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(flush_interval_ms) = args.flush_interval_ms {
        config.flush_interval_ms = flush_interval_ms;
    }
    if let Some(read_workers) = args.read_workers {
        config.read_workers = read_workers;
    }

    config.validate()?;
    Ok(config)
}

/// Run cache work off the async runtime; the cache API blocks.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Blocking task failed: {}", e)))?
}

// =============================================================================
// Benchmark
// =============================================================================

#[derive(Debug, Serialize)]
struct BenchReport {
    writers: usize,
    readers: usize,
    ops_per_thread: usize,
    elapsed_ms: u128,
    writes_per_sec: f64,
    reads_per_sec: f64,
    read_errors: u64,
    stats: CacheStatsSnapshot,
    storage: StorageStats,
}

async fn run_bench(config: CacheConfig, bench: BenchArgs) -> Result<ExitCode> {
    if bench.key_space == 0 {
        return Err(Error::Config("key_space must be > 0".into()));
    }

    info!(
        "Starting benchmark: {} writers, {} readers, {} ops/thread",
        bench.writers, bench.readers, bench.ops
    );

    let cache = if bench.in_memory {
        Cache::with_backend(config, Arc::new(InMemoryBackend::new()))?
    } else {
        blocking(move || Cache::open(config)).await?
    };
    let cache = Arc::new(cache);

    // Start metrics server
    let metrics_server = bench.metrics_addr.clone().map(|addr| {
        let source_cache = Arc::clone(&cache);
        let source: StatsSource = Arc::new(move || source_cache.stats());
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(&addr, source).await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    let load_cache = Arc::clone(&cache);
    let load = bench.clone();
    let outcome = blocking(move || drive_load(&load_cache, &load)).await;

    // Close off the runtime threads whether or not the load succeeded
    let close_cache = Arc::clone(&cache);
    let closed = blocking(move || close_cache.close()).await;
    if let Some(server) = metrics_server {
        server.abort();
    }
    let (elapsed, read_errors) = outcome?;
    closed?;

    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let report = BenchReport {
        writers: bench.writers,
        readers: bench.readers,
        ops_per_thread: bench.ops,
        elapsed_ms: elapsed.as_millis(),
        writes_per_sec: (bench.writers * bench.ops) as f64 / secs,
        reads_per_sec: (bench.readers * bench.ops) as f64 / secs,
        read_errors,
        stats: cache.stats(),
        storage: cache.storage_stats(),
    };

    if bench.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::Internal(format!("Failed to encode report: {}", e)))?;
        println!("{}", json);
    } else {
        print_report(&report);
    }

    Ok(ExitCode::SUCCESS)
}

/// Run writer and reader threads to completion, then flush.
fn drive_load(cache: &Arc<Cache>, bench: &BenchArgs) -> Result<(Duration, u64)> {
    let value = vec![b'x'; bench.value_size];
    let start = Instant::now();

    let writers: Vec<_> = (0..bench.writers)
        .map(|w| {
            let cache = Arc::clone(cache);
            let value = value.clone();
            let (ops, key_space) = (bench.ops, bench.key_space);
            thread::spawn(move || -> Result<()> {
                for i in 0..ops {
                    let key = format!("bench-{}", (i * 31 + w) % key_space);
                    cache.set(key, value.clone())?;
                }
                Ok(())
            })
        })
        .collect();

    let readers: Vec<_> = (0..bench.readers)
        .map(|r| {
            let cache = Arc::clone(cache);
            let (ops, key_space) = (bench.ops, bench.key_space);
            thread::spawn(move || {
                let mut errors = 0u64;
                for i in 0..ops {
                    let key = format!("bench-{}", (i * 17 + r) % key_space);
                    if cache.get(key).is_err() {
                        errors += 1;
                    }
                }
                errors
            })
        })
        .collect();

    for handle in writers {
        handle
            .join()
            .map_err(|_| Error::Internal("Writer thread panicked".into()))??;
    }
    let mut read_errors = 0;
    for handle in readers {
        read_errors += handle
            .join()
            .map_err(|_| Error::Internal("Reader thread panicked".into()))?;
    }

    cache.flush()?;
    Ok((start.elapsed(), read_errors))
}

fn print_report(report: &BenchReport) {
    let stats = &report.stats;
    println!("elapsed:          {} ms", report.elapsed_ms);
    println!("writes/sec:       {:.0}", report.writes_per_sec);
    println!("reads/sec:        {:.0}", report.reads_per_sec);
    println!("read errors:      {}", report.read_errors);
    println!("sets accepted:    {}", stats.sets_accepted);
    println!(
        "lookups:          {} hit / {} miss / {} error",
        stats.get_hits, stats.get_misses, stats.get_errors
    );
    println!(
        "flushes:          {} (count {}, timer {}, explicit {}, shutdown {})",
        stats.flushes,
        stats.count_flushes,
        stats.timer_flushes,
        stats.explicit_flushes,
        stats.shutdown_flushes
    );
    println!("flushed writes:   {}", stats.flushed_writes);
    println!("flush failures:   {}", stats.flush_failures);
    println!("avg flush time:   {} us", stats.avg_flush_time_us);
    println!("avg read time:    {} us", stats.avg_read_time_us);
    println!(
        "storage:          {} batches, {} keys, {} bytes written",
        report.storage.batches, report.storage.keys_written, report.storage.bytes_written
    );
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "sled=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Tests
// =============================================================================
