//! 传输驱动抽象。

use crate::types::ChannelOutcome;
use async_trait::async_trait;
use bus_contract::Direction;
use relay_normalize::ChannelRow;

/// 单个传输的读写能力。启动时按 `TransportKind` 选定一次。
///
/// 每个通道独立产出结果，单通道失败不影响其他通道。
#[async_trait]
pub trait TransportDriver: Send {
    /// 诊断文本中的传输名
    fn name(&self) -> &'static str;

    fn supports(&self, _direction: Direction) -> bool {
        true
    }

    async fn read(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome>;

    async fn write(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome>;
}
