//! 设备配置与通道描述。
//!
//! 配置文件格式（JSON）：
//!
//! ```json
//! {
//!   "EquipmentTags": {
//!     "EquipmentName": "PSU-01",
//!     "Communication": "ModbusTcpGeneric",
//!     "Connection": { "IP": "192.168.1.20", "Unit": 1 },
//!     "PortNum": 502,
//!     "ByteOrder": "Big",
//!     "WordOrder": "Little"
//!   },
//!   "Channels": {
//!     "PT-101": { "Type": "HRegister", "IOPoint": 10, "Registers": 1,
//!                 "DataType": "int16", "Scalar": 0.1, "Offset": 0, "Decimal": 1 }
//!   }
//! }
//! ```

use crate::lenient;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 单台设备的完整配置（进程生命周期内只读）。
#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentConfig {
    #[serde(rename = "EquipmentTags")]
    pub tags: EquipmentTags,
    #[serde(rename = "Channels", default)]
    pub channels: BTreeMap<String, ChannelDescriptor>,
}

impl EquipmentConfig {
    pub fn name(&self) -> &str {
        &self.tags.equipment_name
    }

    pub fn transport(&self) -> TransportKind {
        self.tags.communication
    }

    pub fn channel(&self, tagnum: &str) -> Option<&ChannelDescriptor> {
        self.channels.get(tagnum)
    }
}

/// 设备级参数。
#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentTags {
    #[serde(rename = "EquipmentName")]
    pub equipment_name: String,
    #[serde(rename = "Communication")]
    pub communication: TransportKind,
    #[serde(rename = "Connection", default)]
    pub connection: ConnectionParams,
    #[serde(rename = "PortNum", default, deserialize_with = "lenient::option")]
    pub port_num: Option<u16>,
    #[serde(rename = "ByteOrder", default)]
    pub byte_order: Endian,
    #[serde(rename = "WordOrder", default)]
    pub word_order: Endian,
    #[serde(rename = "VISA_address", default)]
    pub visa_address: Option<String>,
    #[serde(rename = "ReadTerminalChar", default)]
    pub read_terminator: Option<String>,
    #[serde(rename = "WriteTerminalChar", default)]
    pub write_terminator: Option<String>,
    #[serde(rename = "TargetIP", default)]
    pub target_ip: Option<String>,
    /// SQL 型设备的连接串
    #[serde(rename = "Server", default)]
    pub server: Option<String>,
    #[serde(rename = "DataReadTopic", default)]
    pub data_read_topic: Option<String>,
    #[serde(rename = "DataWriteTopic", default)]
    pub data_write_topic: Option<String>,
}

/// 物理连接参数（TCP 或串口）。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionParams {
    #[serde(rename = "IP", default)]
    pub ip: Option<String>,
    /// Modbus 从站地址
    #[serde(rename = "Unit", default, deserialize_with = "lenient::option")]
    pub unit: Option<u8>,
    /// 串口路径
    #[serde(rename = "Port", default)]
    pub port: Option<String>,
    #[serde(rename = "Baudrate", default, deserialize_with = "lenient::option")]
    pub baudrate: Option<u32>,
    #[serde(rename = "Parity", default)]
    pub parity: Option<String>,
    #[serde(rename = "Stopbits", default, deserialize_with = "lenient::option")]
    pub stopbits: Option<u8>,
    #[serde(rename = "Bytesize", default, deserialize_with = "lenient::option")]
    pub bytesize: Option<u8>,
}

/// 通道描述（通道表中的一项，键为 Tagnum）。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelDescriptor {
    #[serde(rename = "Type", default)]
    pub kind: ChannelKind,
    #[serde(rename = "IOPoint", default)]
    pub io_point: Option<IoPoint>,
    #[serde(rename = "Module", default, deserialize_with = "lenient::option")]
    pub module: Option<u32>,
    #[serde(rename = "Channel", default, deserialize_with = "lenient::option")]
    pub channel: Option<u32>,
    #[serde(rename = "Registers", default, deserialize_with = "lenient::option")]
    pub registers: Option<u16>,
    #[serde(rename = "Unit", default, deserialize_with = "lenient::option")]
    pub unit: Option<u8>,
    #[serde(rename = "DataType", default)]
    pub data_type: DataType,
    #[serde(rename = "Scalar", default, deserialize_with = "lenient::option")]
    pub scalar: Option<f64>,
    #[serde(rename = "Offset", default, deserialize_with = "lenient::option")]
    pub offset: Option<f64>,
    #[serde(rename = "Decimal", default, deserialize_with = "lenient::option")]
    pub decimal: Option<i32>,
    #[serde(rename = "BitStart", default, deserialize_with = "lenient::option")]
    pub bit_start: Option<u8>,
    #[serde(rename = "BitEnd", default, deserialize_with = "lenient::option")]
    pub bit_end: Option<u8>,
    #[serde(rename = "ArrayPos", default, deserialize_with = "lenient::option")]
    pub array_pos: Option<usize>,
    /// SCPI 命令前缀
    #[serde(rename = "RequestText", default)]
    pub request_text: Option<String>,
    #[serde(rename = "Init_Func", default, deserialize_with = "lenient::flag")]
    pub init_func: bool,
    #[serde(rename = "Init_Text", default)]
    pub init_text: Option<String>,
    /// SQL 直查语句
    #[serde(rename = "QueryText", default)]
    pub query_text: Option<String>,
}

impl ChannelDescriptor {
    /// 寄存器跨度，缺省 1。
    pub fn register_count(&self) -> u16 {
        self.registers.filter(|count| *count > 0).unwrap_or(1)
    }

    /// Modbus 地址。
    pub fn address(&self) -> Option<u16> {
        self.io_point.as_ref().and_then(IoPoint::address)
    }

    /// SCPI 命令片段。
    pub fn command_fragment(&self) -> String {
        self.io_point
            .as_ref()
            .map(IoPoint::text)
            .unwrap_or_default()
    }
}

/// 线上地址：Modbus 为寄存器号，SCPI 为命令片段。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IoPoint {
    Address(u32),
    Text(String),
}

impl IoPoint {
    pub fn address(&self) -> Option<u16> {
        match self {
            Self::Address(n) => u16::try_from(*n).ok(),
            Self::Text(s) => s.trim().parse::<u16>().ok(),
        }
    }

    pub fn text(&self) -> String {
        match self {
            Self::Address(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// 通道类型（寄存器类 / Opto 点类型）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ChannelKind {
    HoldingRegister,
    InputRegister,
    DiscreteInput,
    Coil,
    Analog,
    Digital,
    Feature,
    #[default]
    Unspecified,
    Other(String),
}

impl ChannelKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::HoldingRegister => "HRegister",
            Self::InputRegister => "IRegister",
            Self::DiscreteInput => "DiscreteInputs",
            Self::Coil => "Coils",
            Self::Analog => "Analog",
            Self::Digital => "Digital",
            Self::Feature => "Feature",
            Self::Unspecified => "",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for ChannelKind {
    fn from(value: &str) -> Self {
        match value.trim() {
            "HRegister" => Self::HoldingRegister,
            "IRegister" => Self::InputRegister,
            "DiscreteInputs" | "DiscreteInput" => Self::DiscreteInput,
            "Coils" | "Coil" => Self::Coil,
            "Analog" => Self::Analog,
            "Digital" => Self::Digital,
            "Feature" => Self::Feature,
            "" => Self::Unspecified,
            other => Self::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ChannelKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::from(text.as_str()))
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通道数据类型，决定编解码分支。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// SCPI 整数
    Nr1,
    /// SCPI 实数
    Nr2,
    Bool,
    Bit,
    Int16,
    Uint16,
    Int32,
    Float16,
    #[default]
    Float32,
    Hex,
    /// 无法识别的类型标记，编解码输出 NULL 哨兵
    Unknown(String),
}

impl DataType {
    /// 是否走缩放路径（需要 Scalar/Offset/Decimal）。
    pub fn is_scaled(&self) -> bool {
        matches!(
            self,
            Self::Nr1 | Self::Nr2 | Self::Int16 | Self::Uint16 | Self::Float16 | Self::Float32
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Nr1 => "NR1",
            Self::Nr2 => "NR2",
            Self::Bool => "bool",
            Self::Bit => "bit",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Hex => "HEX",
            Self::Unknown(s) => s.as_str(),
        }
    }
}

impl From<&str> for DataType {
    fn from(value: &str) -> Self {
        match value.trim() {
            "NR1" => Self::Nr1,
            "NR2" => Self::Nr2,
            "bool" | "Bool" => Self::Bool,
            "bit" => Self::Bit,
            "int16" => Self::Int16,
            "uint16" => Self::Uint16,
            "int32" => Self::Int32,
            "float16" => Self::Float16,
            "float32" => Self::Float32,
            "HEX" | "hex" => Self::Hex,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::from(text.as_str()))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 字节序 / 字序。配置中只有 `"Little"` 表示小端，其余均为大端。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl<'de> Deserialize<'de> for Endian {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        Ok(match text.as_deref().map(str::trim) {
            Some("Little") | Some("little") => Self::Little,
            _ => Self::Big,
        })
    }
}

/// 未知的通信方式。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown communication type: {0}")]
pub struct UnknownTransport(pub String);

/// 传输方式，启动时确定一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// 分组批量读 + 单寄存器写
    ModbusTcp,
    /// 单寄存器读写
    SingleModbusTcp,
    /// 逐通道多寄存器读写（字节序/字序感知）
    ModbusTcpGeneric,
    ModbusRtu,
    Opto22,
    Scpi,
    Mqtt,
    Ping,
    PostgreSql,
    Virtual,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModbusTcp => "ModbusTcp",
            Self::SingleModbusTcp => "SingleModbusTcp",
            Self::ModbusTcpGeneric => "ModbusTcpGeneric",
            Self::ModbusRtu => "ModbusRTU",
            Self::Opto22 => "Opto",
            Self::Scpi => "SCPI",
            Self::Mqtt => "MQTT",
            Self::Ping => "Ping",
            Self::PostgreSql => "PostGreSQL",
            Self::Virtual => "Virtual",
        }
    }

    /// 总线直通型设备。
    pub fn is_bus(&self) -> bool {
        matches!(self, Self::Mqtt)
    }

    pub fn is_modbus_tcp(&self) -> bool {
        matches!(
            self,
            Self::ModbusTcp | Self::SingleModbusTcp | Self::ModbusTcpGeneric
        )
    }
}

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "ModbusTcp" => Ok(Self::ModbusTcp),
            "SingleModbusTcp" => Ok(Self::SingleModbusTcp),
            "ModbusTcpGeneric" | "ModbusTcpKRBH" | "DoubleModbusTcp" => Ok(Self::ModbusTcpGeneric),
            "ModbusRTU" | "ModbusRTUDouble" => Ok(Self::ModbusRtu),
            "Opto" => Ok(Self::Opto22),
            "SCPI" => Ok(Self::Scpi),
            "MQTT" => Ok(Self::Mqtt),
            "Ping" => Ok(Self::Ping),
            "PostGreSQL" => Ok(Self::PostgreSql),
            "Virtual" => Ok(Self::Virtual),
            other => Err(UnknownTransport(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for TransportKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
