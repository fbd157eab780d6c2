//! Prometheus metrics.
//!
//! Request counters and latency histograms are process-wide and registered
//! once. Gauges describing one server (sessions, nodes, watches) live in a
//! per-server registry refreshed from [`ServerStats`] on every scrape, so
//! several servers can share a process.


use std::sync::Arc;
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use crate::ServerStats;

lazy_static! {
    pub static ref REQUEST_COUNTER: IntCounterVec = IntCounterVec::new(
        Opts::new("keeper_requests_total", "Client requests by operation and outcome"),
        &["op", "result"]
    )
    .expect("metric can not be created");

    pub static ref REQUEST_LATENCY_METRIC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("keeper_request_latency_ms", "Request processing latency in ms")
            .buckets(exponential_buckets(0.05, 2.0, 16).expect("valid buckets")),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref SESSION_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("keeper_session_events_total", "Session lifecycle events"),
        &["event"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_EVENTS_FIRED: IntCounter = IntCounter::new(
        "keeper_watch_events_fired_total",
        "Watch events delivered to sessions"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER_ONCE: Once = Once::new();

/// Registers the process-wide collectors with `registry`.
pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(REQUEST_COUNTER.clone()),
        Box::new(REQUEST_LATENCY_METRIC.clone()),
        Box::new(SESSION_EVENTS.clone()),
        Box::new(WATCH_EVENTS_FIRED.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            // Already registered is fine; anything else is worth a log line
            if !matches!(e, prometheus::Error::AlreadyReg) {
                error!("collector can not be registered: {}", e);
            }
        }
    }
}

/// Registers the process-wide collectors with the global registry. Safe to
/// call any number of times, with monitoring enabled or not.
pub fn init_metrics() {
    REGISTER_ONCE.call_once(|| register_custom_metrics(&REGISTRY));
}

pub(crate) fn record_request(
    op: &str,
    result: &str,
    latency_ms: f64,
) {
    REQUEST_COUNTER.with_label_values(&[op, result]).inc();
    REQUEST_LATENCY_METRIC.with_label_values(&[op]).observe(latency_ms);
}

pub(crate) fn record_session_event(event: &str) {
    SESSION_EVENTS.with_label_values(&[event]).inc();
}

pub(crate) fn record_watch_events(count: usize) {
    if count > 0 {
        WATCH_EVENTS_FIRED.inc_by(count as u64);
    }
}

/// Gauges for one server, refreshed from its stats on scrape
pub struct ServerGauges {
    registry: Registry,
    active_sessions: IntGauge,
    znode_count: IntGauge,
    watch_count: IntGauge,
    alive_connections: IntGauge,
    ephemeral_count: IntGauge,
    last_zxid: IntGauge,
}

impl ServerGauges {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let gauge = |name: &str, help: &str| -> prometheus::Result<IntGauge> {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        Ok(Self {
            active_sessions: gauge("keeper_active_sessions", "Live client sessions")?,
            znode_count: gauge("keeper_znode_count", "Nodes in the data tree")?,
            watch_count: gauge("keeper_watch_count", "Pending watches")?,
            alive_connections: gauge("keeper_alive_connections", "Open client connections")?,
            ephemeral_count: gauge("keeper_ephemeral_count", "Ephemeral nodes")?,
            last_zxid: gauge("keeper_last_zxid", "Last committed transaction id")?,
            registry,
        })
    }

    pub fn refresh(
        &self,
        stats: &ServerStats,
    ) {
        self.active_sessions.set(stats.session_count as i64);
        self.znode_count.set(stats.node_count as i64);
        self.watch_count.set(stats.watch_count as i64);
        self.alive_connections.set(stats.alive_connections as i64);
        self.ephemeral_count.set(stats.ephemeral_count as i64);
        self.last_zxid.set(stats.last_zxid as i64);
    }

    /// Text exposition of these gauges plus the process-wide collectors
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!("could not encode server metrics: {}", e);
        }
        if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
            error!("could not encode custom metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_else(|e| {
            error!("metrics could not be from_utf8'd: {}", e);
            String::default()
        })
    }
}

/// Source of fresh stats for each scrape
pub type StatsProvider = Arc<dyn Fn() -> ServerStats + Send + Sync>;

/// Serves `GET /metrics` until `shutdown_signal` fires.
pub async fn start_server(
    port: u16,
    stats: StatsProvider,
    mut shutdown_signal: watch::Receiver<()>,
) {
    init_metrics();
    let gauges = match ServerGauges::new() {
        Ok(gauges) => Arc::new(gauges),
        Err(e) => {
            error!("metrics gauges can not be created: {}", e);
            return;
        }
    };

    let metrics_route = warp::path!("metrics").and_then(move || {
        let gauges = gauges.clone();
        let stats = stats.clone();
        async move { metrics_handler(gauges, stats).await }
    });

    match warp::serve(metrics_route).try_bind_with_graceful_shutdown(
        ([0, 0, 0, 0], port),
        async move {
            let _ = shutdown_signal.changed().await;
        },
    ) {
        Ok((addr, server)) => {
            info!(%addr, "metrics exporter listening");
            server.await;
            info!("metrics exporter stopped");
        }
        Err(e) => error!("metrics exporter failed to bind port {}: {}", port, e),
    }
}

async fn metrics_handler(
    gauges: Arc<ServerGauges>,
    stats: StatsProvider,
) -> Result<impl Reply, Rejection> {
    gauges.refresh(&stats());
    Ok(gauges.render())
}
