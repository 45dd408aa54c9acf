//! 运行配置加载：设备/入库配置文件 + 总线环境变量。

use domain::{ChannelDescriptor, ChannelKind, DataType, EquipmentConfig, TransportKind};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

/// 配置文件路径环境变量（命令行第一个参数优先）。
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("read config {0}: {1}")]
    Io(String, String),
    #[error("parse config: {0}")]
    Parse(String),
    #[error("channel {tagnum}: {message}")]
    Channel { tagnum: String, message: String },
    #[error("equipment: {0}")]
    Equipment(String),
}

/// 总线连接配置。
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_seconds: u64,
}

impl BrokerConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("RELAY_MQTT_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = read_u16_with_default("RELAY_MQTT_PORT", 1883)?;
        let username = read_optional("RELAY_MQTT_USERNAME");
        let password = read_optional("RELAY_MQTT_PASSWORD");
        let keep_alive_seconds = read_u64_with_default("RELAY_MQTT_KEEP_ALIVE_SECONDS", 30)?;
        Ok(Self {
            host,
            port,
            username,
            password,
            keep_alive_seconds,
        })
    }
}

/// 入库进程配置。
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub database_name: String,
    pub server: String,
    pub default_table: String,
    /// 刷写失败后最多保留的待写行数
    pub max_pending_rows: usize,
}

#[derive(Debug, Deserialize)]
struct RecorderDocument {
    #[serde(rename = "DatabaseTags")]
    tags: RecorderTags,
    #[serde(rename = "DatabaseDetails")]
    details: RecorderDetails,
}

#[derive(Debug, Deserialize)]
struct RecorderTags {
    #[serde(rename = "DatabaseName")]
    database_name: String,
}

#[derive(Debug, Deserialize)]
struct RecorderDetails {
    #[serde(rename = "Server")]
    server: String,
    #[serde(rename = "DefaultTable")]
    default_table: String,
    #[serde(rename = "MaxPendingRows", default)]
    max_pending_rows: Option<usize>,
}

const DEFAULT_MAX_PENDING_ROWS: usize = 100_000;

/// 配置文件路径：命令行第一个参数，其次 `RELAY_CONFIG`。
pub fn config_path_from_args<I>(mut args: I) -> Result<PathBuf, ConfigError>
where
    I: Iterator<Item = String>,
{
    if let Some(path) = args.next().filter(|arg| !arg.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    read_optional(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .ok_or_else(|| ConfigError::Missing(CONFIG_PATH_ENV.to_string()))
}

/// 加载并校验设备配置。
pub fn load_equipment_config(path: &Path) -> Result<EquipmentConfig, ConfigError> {
    let text = read_file(path)?;
    let config = parse_equipment_config(&text)?;
    info!(
        target: "relay.config",
        equipment = %config.name(),
        transport = %config.transport(),
        channels = config.channels.len(),
        "equipment_config_loaded"
    );
    Ok(config)
}

pub fn parse_equipment_config(text: &str) -> Result<EquipmentConfig, ConfigError> {
    let config: EquipmentConfig =
        serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
    validate_equipment(&config)?;
    Ok(config)
}

/// 加载入库进程配置。
pub fn load_recorder_config(path: &Path) -> Result<RecorderConfig, ConfigError> {
    let text = read_file(path)?;
    parse_recorder_config(&text)
}

pub fn parse_recorder_config(text: &str) -> Result<RecorderConfig, ConfigError> {
    let document: RecorderDocument =
        serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
    if document.tags.database_name.trim().is_empty() {
        return Err(ConfigError::Equipment("DatabaseName is empty".to_string()));
    }
    if document.details.default_table.trim().is_empty() {
        return Err(ConfigError::Equipment("DefaultTable is empty".to_string()));
    }
    Ok(RecorderConfig {
        database_name: document.tags.database_name,
        server: document.details.server,
        default_table: document.details.default_table,
        max_pending_rows: document
            .details
            .max_pending_rows
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_PENDING_ROWS),
    })
}

/// 设备配置校验：传输所需字段、通道所需字段。
pub fn validate_equipment(config: &EquipmentConfig) -> Result<(), ConfigError> {
    let tags = &config.tags;
    if tags.equipment_name.trim().is_empty() {
        return Err(ConfigError::Equipment("EquipmentName is empty".to_string()));
    }

    let transport = config.transport();
    match transport {
        TransportKind::ModbusTcp
        | TransportKind::SingleModbusTcp
        | TransportKind::ModbusTcpGeneric
        | TransportKind::Opto22 => require(&tags.connection.ip, "Connection.IP")?,
        TransportKind::ModbusRtu => require(&tags.connection.port, "Connection.Port")?,
        TransportKind::Scpi => require(&tags.visa_address, "VISA_address")?,
        TransportKind::Ping => require(&tags.target_ip, "TargetIP")?,
        TransportKind::PostgreSql => require(&tags.server, "Server")?,
        TransportKind::Mqtt | TransportKind::Virtual => {}
    }

    for (tagnum, channel) in &config.channels {
        validate_channel(transport, config, tagnum, channel)?;
    }
    Ok(())
}

fn validate_channel(
    transport: TransportKind,
    config: &EquipmentConfig,
    tagnum: &str,
    channel: &ChannelDescriptor,
) -> Result<(), ConfigError> {
    let fail = |message: &str| ConfigError::Channel {
        tagnum: tagnum.to_string(),
        message: message.to_string(),
    };

    // Ping、SCPI 与总线直通不做缩放
    let scaled = !matches!(
        transport,
        TransportKind::Ping | TransportKind::Mqtt | TransportKind::Scpi
    );
    if scaled && channel.data_type.is_scaled() {
        if channel.scalar.is_none() {
            return Err(fail("Scalar is required"));
        }
        if channel.offset.is_none() {
            return Err(fail("Offset is required"));
        }
        if channel.decimal.is_none() {
            return Err(fail("Decimal is required"));
        }
        if channel.scalar == Some(0.0) {
            return Err(fail("Scalar must be non-zero"));
        }
    }

    match transport {
        TransportKind::ModbusTcp
        | TransportKind::SingleModbusTcp
        | TransportKind::ModbusTcpGeneric
        | TransportKind::ModbusRtu => {
            if channel.address().is_none() {
                return Err(fail("IOPoint must be a register address"));
            }
            if !matches!(
                channel.kind,
                ChannelKind::HoldingRegister
                    | ChannelKind::InputRegister
                    | ChannelKind::DiscreteInput
                    | ChannelKind::Coil
            ) {
                return Err(fail("Type must be a register class"));
            }
            if channel.data_type == DataType::Bit && channel.bit_start.is_none() {
                return Err(fail("BitStart is required for bit channels"));
            }
            if transport == TransportKind::ModbusRtu
                && channel.unit.is_none()
                && config.tags.connection.unit.is_none()
            {
                return Err(fail("Unit is required"));
            }
        }
        TransportKind::Opto22 => {
            if channel.module.is_none() || channel.channel.is_none() {
                return Err(fail("Module and Channel are required"));
            }
        }
        TransportKind::Scpi => {
            if channel.io_point.is_none() {
                return Err(fail("IOPoint is required"));
            }
        }
        TransportKind::PostgreSql => {
            if channel.query_text.as_deref().is_none_or(str::is_empty) {
                return Err(fail("QueryText is required"));
            }
        }
        TransportKind::Mqtt | TransportKind::Ping | TransportKind::Virtual => {}
    }
    Ok(())
}

fn require(value: &Option<String>, field: &str) -> Result<(), ConfigError> {
    match value.as_deref() {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::Equipment(format!("{field} is required"))),
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map_err(|err| ConfigError::Io(path.display().to_string(), err.to_string()))
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
