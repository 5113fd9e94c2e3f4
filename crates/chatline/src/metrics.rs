use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

struct ChatMetrics {
    requests: IntCounterVec,
    active_streams: IntGauge,
    persist_failures: IntCounter,
    stream_duration: Histogram,
}

impl ChatMetrics {
    fn build() -> prometheus::Result<Self> {
        Ok(Self {
            requests: IntCounterVec::new(
                prometheus::opts!("requests_total", "Total requests per route"),
                &["route", "status"],
            )?,
            active_streams: IntGauge::new("active_streams", "Chat completions currently streaming")?,
            persist_failures: IntCounter::new(
                "persist_failures_total",
                "Transcripts that failed to persist after a stream",
            )?,
            stream_duration: Histogram::with_opts(
                HistogramOpts::new("stream_duration_seconds", "Time from upstream start to persistence")
                    .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            )?,
        })
    }

    fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.requests.clone()))?;
        registry.register(Box::new(self.active_streams.clone()))?;
        registry.register(Box::new(self.persist_failures.clone()))?;
        registry.register(Box::new(self.stream_duration.clone()))?;
        Ok(())
    }
}

static METRICS: OnceLock<ChatMetrics> = OnceLock::new();

/// Registers all collectors. Later calls are no-ops.
pub fn init_metrics() -> prometheus::Result<()> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let metrics = ChatMetrics::build()?;
    if METRICS.set(metrics).is_ok() {
        if let Some(metrics) = METRICS.get() {
            metrics.register(&REGISTRY)?;
        }
    }
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(metrics) = METRICS.get() {
        metrics.requests.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_streams() {
    if let Some(metrics) = METRICS.get() {
        metrics.active_streams.inc();
    }
}

pub fn dec_streams() {
    if let Some(metrics) = METRICS.get() {
        metrics.active_streams.dec();
    }
}

pub fn inc_persist_failures() {
    if let Some(metrics) = METRICS.get() {
        metrics.persist_failures.inc();
    }
}

pub fn observe_stream_duration(seconds: f64) {
    if let Some(metrics) = METRICS.get() {
        metrics.stream_duration.observe(seconds);
    }
}

pub fn render() -> prometheus::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

pub async fn get_metrics() -> impl IntoResponse {
    match render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
