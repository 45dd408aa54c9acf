//! 协议错误类型定义

use relay_normalize::CodecError;

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 设备拒绝（OptoMMP rcode 非零等）
    #[error("device rejected request: {0}")]
    Rejected(String),

    /// 当前传输不支持的操作
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// 单通道错误：只影响本通道，不影响同一请求的其他通道。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelFault {
    #[error("transport: {0}")]
    Transport(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl From<ProtocolError> for ChannelFault {
    fn from(err: ProtocolError) -> Self {
        Self::Transport(err.to_string())
    }
}
