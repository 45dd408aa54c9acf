//! Relay 网关共享数据模型。
//!
//! - [`equipment`]：设备配置与通道描述（进程启动时加载，之后只读）
//! - [`data`]：读数、结果信封、批量行

pub mod data;
pub mod equipment;
mod lenient;

pub use data::{
    BatchRow, BatchValue, Reading, ReadingValue, ResultEnvelope, TIME_FORMAT, capture_time,
    format_time, parse_time,
};
pub use equipment::{
    ChannelDescriptor, ChannelKind, ConnectionParams, DataType, Endian, EquipmentConfig,
    EquipmentTags, IoPoint, TransportKind, UnknownTransport,
};
