//! 追踪初始化与进程计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub requests_routed: u64,
    pub request_faults: u64,
    pub channel_faults: u64,
    pub readings_published: u64,
    pub rows_ingested: u64,
    pub rows_flushed: u64,
    pub flush_failures: u64,
    pub backpressure: u64,
    pub flush_latency_ms_total: u64,
    pub flush_latency_ms_count: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    requests_routed: AtomicU64,
    request_faults: AtomicU64,
    channel_faults: AtomicU64,
    readings_published: AtomicU64,
    rows_ingested: AtomicU64,
    rows_flushed: AtomicU64,
    flush_failures: AtomicU64,
    backpressure: AtomicU64,
    flush_latency_ms_total: AtomicU64,
    flush_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            requests_routed: AtomicU64::new(0),
            request_faults: AtomicU64::new(0),
            channel_faults: AtomicU64::new(0),
            readings_published: AtomicU64::new(0),
            rows_ingested: AtomicU64::new(0),
            rows_flushed: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            backpressure: AtomicU64::new(0),
            flush_latency_ms_total: AtomicU64::new(0),
            flush_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_routed: self.requests_routed.load(Ordering::Relaxed),
            request_faults: self.request_faults.load(Ordering::Relaxed),
            channel_faults: self.channel_faults.load(Ordering::Relaxed),
            readings_published: self.readings_published.load(Ordering::Relaxed),
            rows_ingested: self.rows_ingested.load(Ordering::Relaxed),
            rows_flushed: self.rows_flushed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            flush_latency_ms_total: self.flush_latency_ms_total.load(Ordering::Relaxed),
            flush_latency_ms_count: self.flush_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if fmt().with_env_filter(filter).try_init().is_ok() {
        tracing::debug!(target: "relay.telemetry", "tracing_initialized");
    }
}

/// 记录已路由请求次数。
pub fn record_request_routed() {
    metrics().requests_routed.fetch_add(1, Ordering::Relaxed);
}

/// 记录请求级错误次数（ServerIssue）。
pub fn record_request_fault() {
    metrics().request_faults.fetch_add(1, Ordering::Relaxed);
}

/// 记录通道级错误次数（CommIssue）。
pub fn record_channel_fault() {
    metrics().channel_faults.fetch_add(1, Ordering::Relaxed);
}

pub fn record_readings_published(count: u64) {
    metrics()
        .readings_published
        .fetch_add(count, Ordering::Relaxed);
}

pub fn record_rows_ingested(count: u64) {
    metrics().rows_ingested.fetch_add(count, Ordering::Relaxed);
}

pub fn record_rows_flushed(count: u64) {
    metrics().rows_flushed.fetch_add(count, Ordering::Relaxed);
}

pub fn record_flush_failure() {
    metrics().flush_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录背压次数。
pub fn record_backpressure() {
    metrics().backpressure.fetch_add(1, Ordering::Relaxed);
}

/// 记录刷写延迟（毫秒）。
pub fn record_flush_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .flush_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .flush_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
