//! Modbus 客户端抽象与 tokio-modbus 实现。

use crate::error::{ChannelFault, ProtocolError};
use domain::ReadingValue;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

/// Modbus 主站操作，`unit` 为从站地址。
#[async_trait]
pub trait ModbusClient: Send {
    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError>;

    async fn read_input_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError>;

    async fn read_coils(&mut self, unit: u8, address: u16, count: u16)
    -> Result<Vec<bool>, ProtocolError>;

    async fn read_discrete_inputs(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ProtocolError>;

    async fn write_register(&mut self, unit: u8, address: u16, value: u16)
    -> Result<(), ProtocolError>;

    async fn write_registers(
        &mut self,
        unit: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), ProtocolError>;

    async fn write_coil(&mut self, unit: u8, address: u16, value: bool) -> Result<(), ProtocolError>;
}

/// 基于 tokio-modbus `Context` 的客户端（TCP 与 RTU 共用）。
pub struct TokioModbusClient {
    ctx: Context,
    io_timeout: Duration,
}

impl TokioModbusClient {
    pub fn new(ctx: Context, io_timeout: Duration) -> Self {
        Self { ctx, io_timeout }
    }
}

macro_rules! modbus_call {
    ($self:ident, $unit:expr, $op:literal, $call:expr) => {{
        $self.ctx.set_slave(Slave($unit));
        timeout($self.io_timeout, $call)
            .await
            .map_err(|_| ProtocolError::Timeout(format!("{} after {:?}", $op, $self.io_timeout)))?
            .map_err(|e| ProtocolError::Modbus(e.to_string()))?
            .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))
    }};
}

#[async_trait]
impl ModbusClient for TokioModbusClient {
    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        modbus_call!(
            self,
            unit,
            "read_holding_registers",
            self.ctx.read_holding_registers(address, count)
        )
    }

    async fn read_input_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        modbus_call!(
            self,
            unit,
            "read_input_registers",
            self.ctx.read_input_registers(address, count)
        )
    }

    async fn read_coils(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ProtocolError> {
        modbus_call!(self, unit, "read_coils", self.ctx.read_coils(address, count))
    }

    async fn read_discrete_inputs(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ProtocolError> {
        modbus_call!(
            self,
            unit,
            "read_discrete_inputs",
            self.ctx.read_discrete_inputs(address, count)
        )
    }

    async fn write_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), ProtocolError> {
        modbus_call!(
            self,
            unit,
            "write_single_register",
            self.ctx.write_single_register(address, value)
        )
    }

    async fn write_registers(
        &mut self,
        unit: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), ProtocolError> {
        modbus_call!(
            self,
            unit,
            "write_multiple_registers",
            self.ctx.write_multiple_registers(address, values)
        )
    }

    async fn write_coil(&mut self, unit: u8, address: u16, value: bool) -> Result<(), ProtocolError> {
        modbus_call!(
            self,
            unit,
            "write_single_coil",
            self.ctx.write_single_coil(address, value)
        )
    }
}

/// 线圈/离散输入读回的首位。
pub(crate) fn first_bit(bits: &[bool]) -> Result<ReadingValue, ChannelFault> {
    bits.first()
        .map(|bit| ReadingValue::Bool(*bit))
        .ok_or_else(|| ChannelFault::Transport("empty coil response".to_string()))
}
