//! 虚拟设备：读取时对请求值做标量解码，写入时原样回显。

use crate::driver::TransportDriver;
use crate::types::ChannelOutcome;
use async_trait::async_trait;
use relay_normalize::{ChannelRow, decode_scalar};

#[derive(Debug, Default)]
pub struct VirtualDriver;

#[async_trait]
impl TransportDriver for VirtualDriver {
    fn name(&self) -> &'static str {
        "Virtual"
    }

    async fn read(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        rows.iter()
            .map(|row| ChannelOutcome::ok(&row.tagnum, decode_scalar(&row.requested, &row.descriptor)))
            .collect()
    }

    async fn write(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        rows.iter()
            .map(|row| ChannelOutcome::ok(&row.tagnum, row.requested.clone()))
            .collect()
    }
}
