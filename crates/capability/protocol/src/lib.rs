//! # 传输驱动能力模块
//!
//! 每个进程在启动时按 `Communication` 选定一种传输，此后所有请求都经由它完成。
//!
//! ## 架构设计
//!
//! ```text
//! EquipmentConfig (Communication + Connection)
//!       │
//!       ▼
//! connect() ──► Transport
//!                 ├── Device(Box<dyn TransportDriver>)
//!                 │     ├── ModbusTcpDriver      (ModbusTcp / SingleModbusTcp)
//!                 │     ├── ModbusGenericDriver  (ModbusTcpGeneric / ModbusRTU)
//!                 │     ├── ScpiDriver
//!                 │     ├── Opto22Driver
//!                 │     ├── PingDriver
//!                 │     ├── SqlDriver
//!                 │     └── VirtualDriver
//!                 └── Bus(BusPassthrough)        (MQTT)
//!       │
//!       ▼
//! Vec<ChannelOutcome> ──► collect() ──► ResultEnvelope + 单通道故障
//! ```
//!
//! 设备 I/O 都藏在能力 trait 之后（`ModbusClient`、`ScpiSession`、`MmpClient`、
//! `Prober`、`QueryRunner`），测试用手写 mock 替换。

mod bus_passthrough;
mod connection;
mod driver;
mod error;
mod modbus_client;
mod modbus_generic;
mod modbus_tcp;
mod opto22;
mod ping;
mod scpi;
mod sql;
mod types;
mod virtual_device;

pub use bus_passthrough::BusPassthrough;
pub use connection::{ConnectOptions, MODBUS_TCP_PORT, Transport, connect};
pub use driver::TransportDriver;
pub use error::{ChannelFault, ProtocolError};
pub use modbus_client::{ModbusClient, TokioModbusClient};
pub use modbus_generic::{ModbusGenericDriver, UnitSource};
pub use modbus_tcp::{ModbusTcpDriver, ReadMode};
pub use opto22::{
    MmpClient, OPTO_MMP_PORT, Opto22Driver, TcpMmpClient, point_address, read_block_request,
    response_code, write_block_request,
};
pub use ping::{FRESHNESS_WINDOW, PingDriver, Prober, SystemPing};
pub use scpi::{SCPI_RAW_PORT, ScpiDriver, ScpiSession, StreamScpiSession, VisaResource};
pub use sql::{PgQueryRunner, QueryRunner, SqlDriver};
pub use types::{ChannelOutcome, Collected, collect};
pub use virtual_device::VirtualDriver;
