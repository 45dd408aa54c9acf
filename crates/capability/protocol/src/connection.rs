//! 连接工厂：按 `TransportKind` 建立一次连接并选定驱动。

use crate::bus_passthrough::BusPassthrough;
use crate::driver::TransportDriver;
use crate::error::ProtocolError;
use crate::modbus_client::TokioModbusClient;
use crate::modbus_generic::ModbusGenericDriver;
use crate::modbus_tcp::{ModbusTcpDriver, ReadMode};
use crate::opto22::{OPTO_MMP_PORT, Opto22Driver, TcpMmpClient};
use crate::ping::{PingDriver, SystemPing};
use crate::scpi::{ScpiDriver, StreamScpiSession, VisaResource};
use crate::sql::{PgQueryRunner, SqlDriver};
use crate::virtual_device::VirtualDriver;
use bus_contract::BusPublisher;
use domain::{ConnectionParams, EquipmentConfig, EquipmentTags, TransportKind};
use relay_normalize::WireOrder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tokio_modbus::prelude::Slave;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

pub const MODBUS_TCP_PORT: u16 = 502;
const DEFAULT_UNIT: u8 = 1;
const DEFAULT_BAUDRATE: u32 = 9600;

/// 进程选定的传输。
pub enum Transport {
    /// 网关直接驱动的设备
    Device(Box<dyn TransportDriver>),
    /// 设备挂在总线上（`MQTT`）
    Bus(BusPassthrough),
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Device(driver) => driver.name(),
            Self::Bus(_) => TransportKind::Mqtt.as_str(),
        }
    }
}

/// 连接参数。
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
        }
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ProtocolError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ProtocolError::ConfigParse(format!("{field} is required")))
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, ProtocolError> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| ProtocolError::Connection(format!("cannot resolve {host}:{port}")))
}

async fn open_tcp(host: &str, port: u16, options: ConnectOptions) -> Result<TcpStream, ProtocolError> {
    let addr = resolve_addr(host, port).await?;
    timeout(options.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ProtocolError::Timeout(format!("connect {addr}")))?
        .map_err(|e| ProtocolError::Connection(format!("{addr}: {e}")))
}

fn open_serial(
    path: &str,
    connection: &ConnectionParams,
    options: ConnectOptions,
) -> Result<SerialStream, ProtocolError> {
    let parity = match connection.parity.as_deref().map(str::trim) {
        Some("E" | "Even") => tokio_serial::Parity::Even,
        Some("O" | "Odd") => tokio_serial::Parity::Odd,
        _ => tokio_serial::Parity::None,
    };
    let data_bits = match connection.bytesize {
        Some(5) => tokio_serial::DataBits::Five,
        Some(6) => tokio_serial::DataBits::Six,
        Some(7) => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    };
    let stop_bits = match connection.stopbits {
        Some(2) => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    };
    tokio_serial::new(path, connection.baudrate.unwrap_or(DEFAULT_BAUDRATE))
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .timeout(options.io_timeout)
        .open_native_async()
        .map_err(|e| ProtocolError::Connection(format!("serial {path}: {e}")))
}

async fn modbus_tcp_client(
    tags: &EquipmentTags,
    options: ConnectOptions,
) -> Result<TokioModbusClient, ProtocolError> {
    let host = required(tags.connection.ip.as_deref(), "Connection.IP")?;
    let addr = resolve_addr(host, tags.port_num.unwrap_or(MODBUS_TCP_PORT)).await?;
    let ctx = timeout(options.connect_timeout, tokio_modbus::client::tcp::connect(addr))
        .await
        .map_err(|_| ProtocolError::Timeout(format!("connect {addr}")))?
        .map_err(|e| ProtocolError::Connection(format!("{addr}: {e}")))?;
    info!(target: "relay.protocol", addr = %addr, "modbus_tcp_connected");
    Ok(TokioModbusClient::new(ctx, options.io_timeout))
}

/// 建立设备连接。失败属于启动期致命错误。
pub async fn connect(
    config: &EquipmentConfig,
    publisher: Arc<dyn BusPublisher>,
    options: ConnectOptions,
) -> Result<Transport, ProtocolError> {
    let tags = &config.tags;
    let order = WireOrder::new(tags.byte_order, tags.word_order);
    let unit = tags.connection.unit.unwrap_or(DEFAULT_UNIT);

    let driver: Box<dyn TransportDriver> = match tags.communication {
        TransportKind::ModbusTcp => Box::new(ModbusTcpDriver::new(
            Box::new(modbus_tcp_client(tags, options).await?),
            unit,
            ReadMode::Grouped,
        )),
        TransportKind::SingleModbusTcp => Box::new(ModbusTcpDriver::new(
            Box::new(modbus_tcp_client(tags, options).await?),
            unit,
            ReadMode::Single,
        )),
        TransportKind::ModbusTcpGeneric => Box::new(ModbusGenericDriver::tcp(
            Box::new(modbus_tcp_client(tags, options).await?),
            unit,
            order,
        )),
        TransportKind::ModbusRtu => {
            let path = required(tags.connection.port.as_deref(), "Connection.Port")?;
            let serial = open_serial(path, &tags.connection, options)?;
            let ctx = tokio_modbus::client::rtu::attach_slave(serial, Slave(unit));
            info!(target: "relay.protocol", port = %path, "modbus_rtu_opened");
            Box::new(ModbusGenericDriver::rtu(
                Box::new(TokioModbusClient::new(ctx, options.io_timeout)),
                tags.connection.unit,
                order,
            ))
        }
        TransportKind::Opto22 => {
            let host = required(tags.connection.ip.as_deref(), "Connection.IP")?;
            let stream = open_tcp(host, tags.port_num.unwrap_or(OPTO_MMP_PORT), options).await?;
            info!(target: "relay.protocol", host = %host, "opto22_connected");
            Box::new(Opto22Driver::new(Box::new(TcpMmpClient::new(
                stream,
                options.io_timeout,
            ))))
        }
        TransportKind::Scpi => {
            let resource = required(tags.visa_address.as_deref(), "VISA_address")?;
            let read_terminator = tags.read_terminator.as_deref();
            let write_terminator = tags.write_terminator.as_deref();
            let session: Box<dyn crate::scpi::ScpiSession> = match VisaResource::parse(resource)? {
                VisaResource::Socket { host, port } => Box::new(StreamScpiSession::new(
                    open_tcp(&host, port, options).await?,
                    read_terminator,
                    write_terminator,
                    options.io_timeout,
                )),
                VisaResource::Serial { path } => Box::new(StreamScpiSession::new(
                    open_serial(&path, &tags.connection, options)?,
                    read_terminator,
                    write_terminator,
                    options.io_timeout,
                )),
            };
            info!(target: "relay.protocol", resource = %resource, "scpi_session_opened");
            Box::new(ScpiDriver::new(session))
        }
        TransportKind::Ping => {
            let target = required(tags.target_ip.as_deref(), "TargetIP")?;
            Box::new(PingDriver::new(target, Box::new(SystemPing)))
        }
        TransportKind::PostgreSql => {
            let server = required(tags.server.as_deref(), "Server")?;
            let pool = relay_storage::connect_pool(server)
                .await
                .map_err(|e| ProtocolError::Connection(e.to_string()))?;
            Box::new(SqlDriver::new(Box::new(PgQueryRunner::new(pool))))
        }
        TransportKind::Virtual => Box::new(VirtualDriver),
        TransportKind::Mqtt => {
            return Ok(Transport::Bus(BusPassthrough::new(
                config.name(),
                tags.data_read_topic.clone(),
                tags.data_write_topic.clone(),
                publisher,
            )));
        }
    };
    Ok(Transport::Device(driver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_contract::MemoryPublisher;
    use serde_json::json;

    fn config(value: serde_json::Value) -> EquipmentConfig {
        serde_json::from_value(value).expect("config")
    }

    #[tokio::test]
    async fn virtual_and_bus_need_no_connection() {
        let publisher = Arc::new(MemoryPublisher::new());
        let virtual_device = config(json!({
            "EquipmentTags": { "EquipmentName": "Sim", "Communication": "Virtual" }
        }));
        let transport = connect(&virtual_device, publisher.clone(), ConnectOptions::default())
            .await
            .expect("virtual");
        assert_eq!(transport.name(), "Virtual");

        let bus = config(json!({
            "EquipmentTags": { "EquipmentName": "Node", "Communication": "MQTT",
                               "DataReadTopic": "node/out", "DataWriteTopic": "node/in" }
        }));
        let transport = connect(&bus, publisher, ConnectOptions::default())
            .await
            .expect("bus");
        assert!(matches!(transport, Transport::Bus(ref b) if b.is_data_topic("node/out")));
    }

    #[tokio::test]
    async fn missing_address_is_config_error() {
        let scpi = config(json!({
            "EquipmentTags": { "EquipmentName": "PSU", "Communication": "SCPI" }
        }));
        let err = connect(&scpi, Arc::new(MemoryPublisher::new()), ConnectOptions::default())
            .await
            .err()
            .expect("error");
        assert!(matches!(err, ProtocolError::ConfigParse(_)));
    }
}
