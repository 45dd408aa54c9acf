//! 时间窗口批量写入器。
//!
//! 每条结果信封展开、清洗后追加到待写批次；每次到达消息时检查窗口，
//! 距上次写入满 1 秒则把整批作为一次操作追加到存储。空闲期间不主动写入，
//! 行只会延迟、不会丢失。

mod sanitize;

pub use sanitize::{flatten, sanitize};

use domain::{BatchRow, ResultEnvelope};
use relay_storage::BatchStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 批量写入错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("writer error: {0}")]
    Writer(String),
    #[error("backpressure: {0}")]
    Backpressure(String),
}

/// 批量写入参数。
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub window: Duration,
    /// 写入失败后保留的待写行上限，超出时拒绝新行
    pub max_pending_rows: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            max_pending_rows: 100_000,
        }
    }
}

/// 单次 ingest 的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 已入队，尚未到写入窗口
    Buffered { pending: usize },
    /// 整批已写入
    Flushed { rows: u64 },
}

/// 批量写入器，独占待写批次。
pub struct BatchWriter {
    store: Arc<dyn BatchStore>,
    config: BatchConfig,
    pending: Vec<BatchRow>,
    last_flush: Instant,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn BatchStore>, config: BatchConfig) -> Self {
        Self::starting_at(store, config, Instant::now())
    }

    /// 以给定时刻作为窗口起点。
    pub fn starting_at(store: Arc<dyn BatchStore>, config: BatchConfig, start: Instant) -> Self {
        Self {
            store,
            config,
            pending: Vec::new(),
            last_flush: start,
        }
    }

    pub fn pending(&self) -> &[BatchRow] {
        &self.pending
    }

    pub async fn ingest(&mut self, envelope: &ResultEnvelope) -> Result<IngestOutcome, PipelineError> {
        self.ingest_at(envelope, Instant::now()).await
    }

    pub async fn ingest_at(
        &mut self,
        envelope: &ResultEnvelope,
        now: Instant,
    ) -> Result<IngestOutcome, PipelineError> {
        let rows = flatten(envelope);
        let mut retried = None;
        if self.over_limit(rows.len()) && self.window_elapsed(now) {
            // 先重试积压批次，写入成功后再判断是否仍超限
            match self.flush(now).await {
                Ok(IngestOutcome::Flushed { rows: written }) => retried = Some(written),
                Ok(IngestOutcome::Buffered { .. }) => {}
                Err(err) => return Err(self.backpressure(Some(&err))),
            }
        }
        if self.over_limit(rows.len()) {
            return Err(self.backpressure(None));
        }
        relay_telemetry::record_rows_ingested(rows.len() as u64);
        self.pending.extend(rows);

        if let Some(written) = retried {
            return Ok(IngestOutcome::Flushed { rows: written });
        }
        if !self.window_elapsed(now) {
            return Ok(IngestOutcome::Buffered {
                pending: self.pending.len(),
            });
        }
        self.flush(now).await
    }

    fn window_elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_flush) >= self.config.window
    }

    fn over_limit(&self, incoming: usize) -> bool {
        self.pending.len() + incoming > self.config.max_pending_rows
    }

    fn backpressure(&self, flush_error: Option<&PipelineError>) -> PipelineError {
        relay_telemetry::record_backpressure();
        let mut message = format!(
            "{} rows pending, limit {}",
            self.pending.len(),
            self.config.max_pending_rows
        );
        if let Some(err) = flush_error {
            message.push_str(&format!(" ({err})"));
        }
        PipelineError::Backpressure(message)
    }

    async fn flush(&mut self, now: Instant) -> Result<IngestOutcome, PipelineError> {
        // 无论成败都重置窗口，失败的批次在下个窗口重试
        self.last_flush = now;
        if self.pending.is_empty() {
            return Ok(IngestOutcome::Flushed { rows: 0 });
        }

        let started = Instant::now();
        match self.store.append_rows(&self.pending).await {
            Ok(rows) => {
                relay_telemetry::record_rows_flushed(rows);
                relay_telemetry::record_flush_latency_ms(started.elapsed().as_millis() as u64);
                debug!(target: "relay.pipeline", rows, "batch_flushed");
                self.pending.clear();
                Ok(IngestOutcome::Flushed { rows })
            }
            Err(err) => {
                relay_telemetry::record_flush_failure();
                warn!(
                    target: "relay.pipeline",
                    pending = self.pending.len(),
                    error = %err,
                    "batch_flush_failed"
                );
                Err(PipelineError::Writer(err.to_string()))
            }
        }
    }
}
