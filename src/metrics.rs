//! Prometheus Metrics Exposition
//!
//! Renders a [`CacheStatsSnapshot`] in the Prometheus text format and serves
//! it on `/metrics`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::cache::CacheStatsSnapshot;
use crate::error::{Error, Result};

/// Source of fresh statistics for each scrape
pub type StatsSource = Arc<dyn Fn() -> CacheStatsSnapshot + Send + Sync>;

const NAMESPACE: &str = "stagecache";

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus error: {}", e))
}

fn counter(registry: &Registry, name: &str, help: &str, value: u64) -> Result<()> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))
        .map_err(prom_err)?;
    counter.inc_by(value);
    registry.register(Box::new(counter)).map_err(prom_err)
}

fn gauge(registry: &Registry, name: &str, help: &str, value: u64) -> Result<()> {
    let gauge =
        IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE)).map_err(prom_err)?;
    gauge.set(value as i64);
    registry.register(Box::new(gauge)).map_err(prom_err)
}

/// Render `stats` in the Prometheus text exposition format.
pub fn render(stats: &CacheStatsSnapshot) -> Result<String> {
    let registry = Registry::new();

    let counters = [
        ("sets_accepted_total", "Writes accepted onto the write queue", stats.sets_accepted),
        ("sets_rejected_total", "Writes refused at admission", stats.sets_rejected),
        ("gets_accepted_total", "Lookups accepted onto the read queue", stats.gets_accepted),
        ("gets_rejected_total", "Lookups refused at admission", stats.gets_rejected),
        ("flushed_writes_total", "Writes persisted by flushes", stats.flushed_writes),
        ("flush_failures_total", "Flushes that failed after retries", stats.flush_failures),
        ("discarded_writes_total", "Writes dropped with a failed flush", stats.discarded_writes),
    ];
    for (name, help, value) in counters {
        counter(&registry, name, help, value)?;
    }

    let lookups = IntCounterVec::new(
        Opts::new("lookups_total", "Lookups answered by the read workers").namespace(NAMESPACE),
        &["outcome"],
    )
    .map_err(prom_err)?;
    lookups.with_label_values(&["hit"]).inc_by(stats.get_hits);
    lookups.with_label_values(&["miss"]).inc_by(stats.get_misses);
    lookups.with_label_values(&["error"]).inc_by(stats.get_errors);
    registry.register(Box::new(lookups)).map_err(prom_err)?;

    let flushes = IntCounterVec::new(
        Opts::new("flushes_total", "Successful batch flushes").namespace(NAMESPACE),
        &["trigger"],
    )
    .map_err(prom_err)?;
    flushes.with_label_values(&["count"]).inc_by(stats.count_flushes);
    flushes.with_label_values(&["timer"]).inc_by(stats.timer_flushes);
    flushes.with_label_values(&["explicit"]).inc_by(stats.explicit_flushes);
    flushes.with_label_values(&["shutdown"]).inc_by(stats.shutdown_flushes);
    registry.register(Box::new(flushes)).map_err(prom_err)?;

    let gauges = [
        ("pending_reads", "Read tasks waiting for a worker", stats.pending_reads),
        ("pending_writes", "Write requests waiting for the batcher", stats.pending_writes),
        ("avg_flush_time_us", "Average flush duration in microseconds", stats.avg_flush_time_us),
        ("avg_read_time_us", "Average lookup duration in microseconds", stats.avg_read_time_us),
    ];
    for (name, help, value) in gauges {
        gauge(&registry, name, help, value)?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(prom_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Non-UTF-8 metrics: {}", e)))
}

/// Serve `/metrics` on `addr` until the task is dropped.
pub async fn serve(addr: &str, source: StatsSource) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let source = Arc::clone(&source);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let source = Arc::clone(&source);
                async move { Ok::<_, Infallible>(handle(req, &source)) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

fn handle(req: Request<Incoming>, source: &StatsSource) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/metrics" => match render(&source()) {
            Ok(body) => text_response(StatusCode::OK, body),
            Err(e) => {
                error!("Failed to render metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        },
        _ => text_response(StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

// =============================================================================
// Tests
// =============================================================================
