//! Ping 可达性驱动。
//!
//! 写入 0 触发一次探测（4 个回显）并记录时刻；读取报告新鲜度：
//! 从未探测或距上次探测超过 2 秒为 1（陈旧），否则为 0。

use crate::driver::TransportDriver;
use crate::error::{ChannelFault, ProtocolError};
use crate::types::ChannelOutcome;
use async_trait::async_trait;
use domain::ReadingValue;
use relay_normalize::ChannelRow;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

/// 新鲜度窗口
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(2);
const ECHO_COUNT: u32 = 4;

/// 可达性探测能力。
#[async_trait]
pub trait Prober: Send + Sync {
    /// 成功时返回进程退出码（0）
    async fn probe(&self, target: &str) -> Result<i32, ProtocolError>;
}

/// 调用系统 `ping -c 4`。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPing;

#[async_trait]
impl Prober for SystemPing {
    async fn probe(&self, target: &str) -> Result<i32, ProtocolError> {
        let output = Command::new("ping")
            .arg("-c")
            .arg(ECHO_COUNT.to_string())
            .arg(target)
            .output()
            .await?;
        match output.status.code() {
            Some(0) => Ok(0),
            code => Err(ProtocolError::Connection(format!(
                "ping {target} exited with {code:?}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

pub struct PingDriver {
    target: String,
    prober: Box<dyn Prober>,
    last_probe: Option<Instant>,
}

impl PingDriver {
    pub fn new(target: impl Into<String>, prober: Box<dyn Prober>) -> Self {
        Self {
            target: target.into(),
            prober,
            last_probe: None,
        }
    }

    pub fn last_probe(&self) -> Option<Instant> {
        self.last_probe
    }

    pub fn is_stale_at(&self, now: Instant) -> bool {
        match self.last_probe {
            None => true,
            Some(at) => now.saturating_duration_since(at) > FRESHNESS_WINDOW,
        }
    }

    /// 以给定时刻计算每个通道的新鲜度。
    pub fn read_at(&self, rows: &[ChannelRow], now: Instant) -> Vec<ChannelOutcome> {
        let state = i64::from(self.is_stale_at(now));
        rows.iter()
            .map(|row| ChannelOutcome::ok(&row.tagnum, ReadingValue::Integer(state)))
            .collect()
    }

    async fn write_one(&mut self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let is_probe = match &row.requested {
            ReadingValue::Integer(v) => *v == 0,
            ReadingValue::Number(v) => *v == 0.0,
            _ => false,
        };
        if !is_probe {
            return Ok(row.requested.clone());
        }

        match self.prober.probe(&self.target).await {
            Ok(code) => {
                self.last_probe = Some(Instant::now());
                info!(target: "relay.protocol", target_ip = %self.target, "ping_probe_ok");
                Ok(ReadingValue::Integer(i64::from(code)))
            }
            Err(err) => {
                warn!(target: "relay.protocol", target_ip = %self.target, error = %err, "ping_probe_failed");
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl TransportDriver for PingDriver {
    fn name(&self) -> &'static str {
        "Ping"
    }

    async fn read(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        self.read_at(rows, Instant::now())
    }

    async fn write(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let result = self.write_one(row).await;
            outcomes.push(ChannelOutcome {
                tagnum: row.tagnum.clone(),
                result,
            });
        }
        outcomes
    }
}
