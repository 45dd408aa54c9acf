//! 多寄存器 Modbus 驱动（`ModbusTcpGeneric` 与 `ModbusRTU` 共用）。
//!
//! 每通道按 `Registers` 数量读取，再按设备字节序/字序解码；
//! 写入为 编码 → 构建载荷 → 批量写寄存器 → 回读。

use crate::driver::TransportDriver;
use crate::error::ChannelFault;
use crate::modbus_client::{ModbusClient, first_bit};
use crate::types::ChannelOutcome;
use async_trait::async_trait;
use domain::{ChannelDescriptor, ChannelKind, ReadingValue};
use relay_normalize::{
    ChannelRow, WireOrder, build_registers, decode_registers, decode_scalar, encode_scalar,
};
use tracing::debug;

/// 从站地址来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSource {
    /// 设备级固定 Unit（TCP）
    Device(u8),
    /// 通道级 Unit，缺省回落到设备级（RTU 总线多从站）
    PerChannel { fallback: Option<u8> },
}

impl UnitSource {
    fn resolve(&self, descriptor: &ChannelDescriptor) -> Result<u8, ChannelFault> {
        match self {
            Self::Device(unit) => Ok(*unit),
            Self::PerChannel { fallback } => descriptor
                .unit
                .or(*fallback)
                .ok_or(ChannelFault::MissingField("Unit")),
        }
    }
}

pub struct ModbusGenericDriver {
    client: Box<dyn ModbusClient>,
    units: UnitSource,
    order: WireOrder,
    name: &'static str,
}

impl ModbusGenericDriver {
    pub fn tcp(client: Box<dyn ModbusClient>, unit: u8, order: WireOrder) -> Self {
        Self {
            client,
            units: UnitSource::Device(unit),
            order,
            name: "ModbusTcpGeneric",
        }
    }

    pub fn rtu(client: Box<dyn ModbusClient>, fallback: Option<u8>, order: WireOrder) -> Self {
        Self {
            client,
            units: UnitSource::PerChannel { fallback },
            order,
            name: "ModbusRTU",
        }
    }

    async fn read_raw(
        &mut self,
        descriptor: &ChannelDescriptor,
    ) -> Result<ReadingValue, ChannelFault> {
        let unit = self.units.resolve(descriptor)?;
        let address = descriptor
            .address()
            .ok_or(ChannelFault::MissingField("IOPoint"))?;
        let count = descriptor.register_count();

        match descriptor.kind {
            ChannelKind::HoldingRegister => {
                let words = self.client.read_holding_registers(unit, address, count).await?;
                Ok(decode_registers(&words, descriptor, self.order)?)
            }
            ChannelKind::InputRegister => {
                let words = self.client.read_input_registers(unit, address, count).await?;
                Ok(decode_registers(&words, descriptor, self.order)?)
            }
            ChannelKind::DiscreteInput => {
                let bits = self.client.read_discrete_inputs(unit, address, 1).await?;
                first_bit(&bits)
            }
            _ => {
                let bits = self.client.read_coils(unit, address, 1).await?;
                first_bit(&bits)
            }
        }
    }

    async fn read_one(&mut self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let raw = self.read_raw(&row.descriptor).await?;
        Ok(decode_scalar(&raw, &row.descriptor))
    }

    async fn write_one(&mut self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let descriptor = &row.descriptor;
        let unit = self.units.resolve(descriptor)?;
        let address = descriptor
            .address()
            .ok_or(ChannelFault::MissingField("IOPoint"))?;
        let raw = encode_scalar(&row.requested, descriptor);
        if raw.is_null() {
            return Err(ChannelFault::InvalidValue(format!("{:?}", row.requested)));
        }

        match descriptor.kind {
            ChannelKind::HoldingRegister | ChannelKind::InputRegister => {
                let payload = build_registers(&raw, &descriptor.data_type, self.order);
                if payload.is_empty() {
                    return Err(ChannelFault::InvalidValue(format!(
                        "cannot build {} payload",
                        descriptor.data_type
                    )));
                }
                debug!(
                    target: "relay.protocol",
                    unit,
                    address,
                    registers = payload.len(),
                    "modbus_write_registers"
                );
                self.client.write_registers(unit, address, &payload).await?;
            }
            _ => {
                let on = raw.as_i64().is_some_and(|v| v != 0);
                self.client.write_coil(unit, address, on).await?;
            }
        }

        let raw = self.read_raw(descriptor).await?;
        Ok(decode_scalar(&raw, descriptor))
    }
}

#[async_trait]
impl TransportDriver for ModbusGenericDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn read(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
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
