//! Modbus TCP 单寄存器驱动。
//!
//! - 分组模式（`ModbusTcp`）：按寄存器类分组，每组对 `[min, max]` 地址跨度做一次批量读，
//!   再按地址偏移拆分到各通道
//! - 单点模式（`SingleModbusTcp`）：每通道一次往返
//!
//! 写入均为单寄存器/单线圈写后回读。

use crate::driver::TransportDriver;
use crate::error::ChannelFault;
use crate::modbus_client::{ModbusClient, first_bit};
use crate::types::ChannelOutcome;
use async_trait::async_trait;
use domain::{ChannelDescriptor, ChannelKind, DataType, ReadingValue};
use relay_normalize::{
    ChannelGroup, ChannelRow, WireOrder, decode_registers, decode_scalar, encode_scalar,
    group_by_kind,
};
use tracing::{debug, warn};

/// 读取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Grouped,
    Single,
}

pub struct ModbusTcpDriver {
    client: Box<dyn ModbusClient>,
    unit: u8,
    mode: ReadMode,
}

impl ModbusTcpDriver {
    pub fn new(client: Box<dyn ModbusClient>, unit: u8, mode: ReadMode) -> Self {
        Self { client, unit, mode }
    }

    async fn read_group(&mut self, group: &ChannelGroup) -> Vec<ChannelOutcome> {
        let Ok(count) = u16::try_from(group.count()) else {
            let fault = ChannelFault::Transport(format!(
                "register span {}..={} is too wide for one read",
                group.start, group.end
            ));
            return group
                .rows
                .iter()
                .map(|row| ChannelOutcome::fault(&row.tagnum, fault.clone()))
                .collect();
        };
        let words = match group.kind {
            ChannelKind::HoldingRegister => self
                .client
                .read_holding_registers(self.unit, group.start, count)
                .await
                .map(GroupValues::Words),
            ChannelKind::InputRegister => self
                .client
                .read_input_registers(self.unit, group.start, count)
                .await
                .map(GroupValues::Words),
            ChannelKind::DiscreteInput => self
                .client
                .read_discrete_inputs(self.unit, group.start, count)
                .await
                .map(GroupValues::Bits),
            _ => self
                .client
                .read_coils(self.unit, group.start, count)
                .await
                .map(GroupValues::Bits),
        };

        let values = match words {
            Ok(values) => values,
            Err(err) => {
                warn!(
                    target: "relay.protocol",
                    kind = %group.kind,
                    start = group.start,
                    count,
                    error = %err,
                    "modbus_group_read_failed"
                );
                let fault = ChannelFault::from(err);
                return group
                    .rows
                    .iter()
                    .map(|row| ChannelOutcome::fault(&row.tagnum, fault.clone()))
                    .collect();
            }
        };

        debug!(
            target: "relay.protocol",
            kind = %group.kind,
            start = group.start,
            count,
            "modbus_group_read"
        );

        group
            .rows
            .iter()
            .map(|row| {
                let raw = row
                    .descriptor
                    .address()
                    .and_then(|address| group.index_of(address))
                    .and_then(|index| values.get(index, &row.descriptor));
                match raw {
                    Some(Ok(raw)) => {
                        ChannelOutcome::ok(&row.tagnum, decode_scalar(&raw, &row.descriptor))
                    }
                    Some(Err(fault)) => ChannelOutcome::fault(&row.tagnum, fault),
                    None => ChannelOutcome::fault(
                        &row.tagnum,
                        ChannelFault::Transport("address missing from bulk read".to_string()),
                    ),
                }
            })
            .collect()
    }

    async fn read_one(&mut self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let address = row
            .descriptor
            .address()
            .ok_or(ChannelFault::MissingField("IOPoint"))?;
        let raw = self.read_raw(&row.descriptor, address).await?;
        Ok(decode_scalar(&raw, &row.descriptor))
    }

    async fn read_raw(
        &mut self,
        descriptor: &ChannelDescriptor,
        address: u16,
    ) -> Result<ReadingValue, ChannelFault> {
        match descriptor.kind {
            ChannelKind::HoldingRegister => {
                let words = self.client.read_holding_registers(self.unit, address, 1).await?;
                first_word(&words, descriptor)
            }
            ChannelKind::InputRegister => {
                let words = self.client.read_input_registers(self.unit, address, 1).await?;
                first_word(&words, descriptor)
            }
            ChannelKind::DiscreteInput => {
                let bits = self.client.read_discrete_inputs(self.unit, address, 1).await?;
                first_bit(&bits)
            }
            _ => {
                let bits = self.client.read_coils(self.unit, address, 1).await?;
                first_bit(&bits)
            }
        }
    }

    async fn write_one(&mut self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let descriptor = &row.descriptor;
        let address = descriptor
            .address()
            .ok_or(ChannelFault::MissingField("IOPoint"))?;
        let raw = encode_scalar(&row.requested, descriptor);
        let Some(word) = raw.as_i64() else {
            return Err(ChannelFault::InvalidValue(format!("{:?}", row.requested)));
        };

        match descriptor.kind {
            ChannelKind::HoldingRegister | ChannelKind::InputRegister => {
                self.client
                    .write_register(self.unit, address, word as u16)
                    .await?;
            }
            _ => {
                self.client.write_coil(self.unit, address, word != 0).await?;
            }
        }
        let raw = self.read_raw(descriptor, address).await?;
        Ok(decode_scalar(&raw, descriptor))
    }
}

enum GroupValues {
    Words(Vec<u16>),
    Bits(Vec<bool>),
}

impl GroupValues {
    fn get(
        &self,
        index: usize,
        descriptor: &ChannelDescriptor,
    ) -> Option<Result<ReadingValue, ChannelFault>> {
        match self {
            Self::Words(words) => words
                .get(index)
                .map(|word| first_word(std::slice::from_ref(word), descriptor)),
            Self::Bits(bits) => bits.get(index).map(|bit| Ok(ReadingValue::Bool(*bit))),
        }
    }
}

/// 单寄存器原始值：int16 按有符号解释，bit 提取位段，其余按无符号整数。
fn first_word(words: &[u16], descriptor: &ChannelDescriptor) -> Result<ReadingValue, ChannelFault> {
    let word = *words
        .first()
        .ok_or_else(|| ChannelFault::Transport("empty register response".to_string()))?;
    match descriptor.data_type {
        DataType::Int16 => Ok(ReadingValue::Integer(i64::from(word as i16))),
        DataType::Bit => Ok(decode_registers(&[word], descriptor, WireOrder::default())?),
        _ => Ok(ReadingValue::Integer(i64::from(word))),
    }
}

#[async_trait]
impl TransportDriver for ModbusTcpDriver {
    fn name(&self) -> &'static str {
        match self.mode {
            ReadMode::Grouped => "ModbusTcp",
            ReadMode::Single => "SingleModbusTcp",
        }
    }

    async fn read(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        match self.mode {
            ReadMode::Grouped => {
                let mut by_tag = Vec::with_capacity(rows.len());
                for group in group_by_kind(rows.to_vec()) {
                    by_tag.extend(self.read_group(&group).await);
                }
                // 按请求顺序输出
                let mut outcomes = Vec::with_capacity(rows.len());
                for row in rows {
                    if let Some(pos) = by_tag.iter().position(|o| o.tagnum == row.tagnum) {
                        outcomes.push(by_tag.swap_remove(pos));
                    }
                }
                outcomes
            }
            ReadMode::Single => {
                let mut outcomes = Vec::with_capacity(rows.len());
                for row in rows {
                    let result = self.read_one(row).await;
                    outcomes.push(ChannelOutcome {
                        tagnum: row.tagnum.clone(),
                        result,
                    });
                }
                outcomes
            }
        }
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
