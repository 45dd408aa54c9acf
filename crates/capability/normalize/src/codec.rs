//! 标量编解码。
//!
//! 解码：原始值 → 原生位宽 → f32 → `+ Offset` → `* Scalar` → 按 `Decimal` 舍入。
//! 编码：`f32(value) / Scalar - Offset` → 原生位宽，不做舍入。

use crate::registers::{f16_bits_to_f32, f32_to_f16_bits};
use domain::{ChannelDescriptor, DataType, ReadingValue};
use tracing::warn;

/// 编解码错误。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("array position {pos} out of range ({len} tokens)")]
    ArrayPos { pos: usize, len: usize },
    #[error("invalid reply: {0}")]
    InvalidReply(String),
    #[error("short payload: expected {expected} registers, got {actual}")]
    ShortPayload { expected: usize, actual: usize },
}

/// 写入线上的原始值。
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    /// 无法编码（NaN、非数值输入、未知类型）
    Null,
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Text(v) => v.trim().parse::<f64>().ok(),
            Self::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Text(v) => v.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// 命令文本形式（SCPI 写入）。
    pub fn to_command_text(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => format!("{v:?}"),
            Self::Text(v) => v.clone(),
            Self::Bool(v) => i64::from(*v).to_string(),
            Self::Null => "NULL".to_string(),
        }
    }
}

impl From<&RawValue> for ReadingValue {
    fn from(value: &RawValue) -> Self {
        match value {
            RawValue::Integer(v) => ReadingValue::Integer(*v),
            RawValue::Float(v) => ReadingValue::Number(*v),
            RawValue::Text(v) => ReadingValue::Text(v.clone()),
            RawValue::Bool(v) => ReadingValue::Bool(*v),
            RawValue::Null => ReadingValue::Null,
        }
    }
}

/// 原始值 → 工程值。失败时返回 `NULL` 哨兵，不报错。
pub fn decode_scalar(raw: &ReadingValue, descriptor: &ChannelDescriptor) -> ReadingValue {
    match &descriptor.data_type {
        DataType::Hex => match parse_hex_digits(raw) {
            Some(value) => ReadingValue::Integer(value),
            None => {
                warn!(target: "relay.codec", raw = ?raw, "hex_decode_failed");
                ReadingValue::Null
            }
        },
        DataType::Bool | DataType::Bit | DataType::Int32 => raw.clone(),
        DataType::Unknown(name) => {
            warn!(target: "relay.codec", data_type = %name, "unknown_data_type");
            ReadingValue::Null
        }
        data_type => {
            let Some(value) = raw.as_f64() else {
                warn!(target: "relay.codec", raw = ?raw, data_type = %data_type, "non_numeric_raw");
                return ReadingValue::Null;
            };
            if value.is_nan() {
                return ReadingValue::Null;
            }
            let native = to_native_width(value, data_type);
            let offset = descriptor.offset.unwrap_or(0.0) as f32;
            let scalar = descriptor.scalar.unwrap_or(1.0) as f32;
            let scaled = f64::from((native + offset) * scalar);
            ReadingValue::Number(match descriptor.decimal {
                Some(decimal) => round_to(scaled, decimal),
                None => scaled,
            })
        }
    }
}

/// 工程值 → 原始值。
pub fn encode_scalar(value: &ReadingValue, descriptor: &ChannelDescriptor) -> RawValue {
    match &descriptor.data_type {
        DataType::Hex => match integer_of(value) {
            Some(v) if v < 0 => RawValue::Text(format!("-0x{:x}", v.unsigned_abs())),
            Some(v) => RawValue::Text(format!("0x{v:x}")),
            None => {
                warn!(target: "relay.codec", value = ?value, "hex_encode_failed");
                RawValue::Null
            }
        },
        DataType::Bool | DataType::Bit => match value {
            ReadingValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "on" => RawValue::Integer(1),
                "false" | "off" => RawValue::Integer(0),
                _ => integer_of(value).map_or(RawValue::Null, RawValue::Integer),
            },
            _ => integer_of(value).map_or(RawValue::Null, RawValue::Integer),
        },
        DataType::Int32 | DataType::Nr2 => match value {
            ReadingValue::Integer(v) => RawValue::Integer(*v),
            ReadingValue::Number(v) if v.is_nan() => RawValue::Null,
            ReadingValue::Number(v) => RawValue::Float(*v),
            ReadingValue::Bool(v) => RawValue::Bool(*v),
            ReadingValue::Text(v) => RawValue::Text(v.clone()),
            ReadingValue::Null => RawValue::Null,
        },
        DataType::Unknown(name) => {
            warn!(target: "relay.codec", data_type = %name, "unknown_data_type");
            RawValue::Null
        }
        data_type => {
            let Some(engineering) = value.as_f64().filter(|v| !v.is_nan()) else {
                return RawValue::Null;
            };
            let scalar = descriptor.scalar.unwrap_or(1.0) as f32;
            let offset = descriptor.offset.unwrap_or(0.0) as f32;
            let raw = engineering as f32 / scalar - offset;
            match data_type {
                DataType::Nr1 => RawValue::Integer(raw as i64),
                DataType::Int16 => RawValue::Integer(i64::from(raw as i16)),
                DataType::Uint16 => RawValue::Integer(i64::from(raw as u16)),
                DataType::Float16 => RawValue::Float(f64::from(f16_bits_to_f32(f32_to_f16_bits(raw)))),
                _ => RawValue::Float(f64::from(raw)),
            }
        }
    }
}

/// SCPI 回复解析：逗号分隔时取 `ArrayPos` 项，去除空白与 NUL。
pub fn parse_scpi_reply(
    reply: &str,
    descriptor: &ChannelDescriptor,
) -> Result<ReadingValue, CodecError> {
    let token = if reply.contains(',') {
        let pos = descriptor
            .array_pos
            .ok_or(CodecError::MissingField("ArrayPos"))?;
        let tokens: Vec<&str> = reply.split(',').collect();
        *tokens.get(pos).ok_or(CodecError::ArrayPos {
            pos,
            len: tokens.len(),
        })?
    } else {
        reply
    };
    let cleaned = token.replace('\0', "");
    let cleaned = cleaned.trim();

    match descriptor.data_type {
        DataType::Nr1 | DataType::Bool | DataType::Int16 => cleaned
            .parse::<i64>()
            .map(ReadingValue::Integer)
            .map_err(|_| CodecError::InvalidReply(cleaned.to_string())),
        _ => cleaned
            .parse::<f64>()
            .map(ReadingValue::Number)
            .map_err(|_| CodecError::InvalidReply(cleaned.to_string())),
    }
}

fn to_native_width(value: f64, data_type: &DataType) -> f32 {
    match data_type {
        DataType::Nr1 => value.trunc() as f32,
        DataType::Int16 => f32::from(value as i16),
        DataType::Uint16 => f32::from(value as u16),
        DataType::Float16 => f16_bits_to_f32(f32_to_f16_bits(value as f32)),
        _ => value as f32,
    }
}

fn round_to(value: f64, decimal: i32) -> f64 {
    let factor = 10f64.powi(decimal);
    let rounded = (value * factor).round_ties_even() / factor;
    if rounded.is_finite() { rounded } else { value }
}

/// HEX 解码：整数的十进制数字按十六进制读取，文本可带 `0x` 前缀。
fn parse_hex_digits(raw: &ReadingValue) -> Option<i64> {
    let digits = match raw {
        ReadingValue::Integer(v) => v.to_string(),
        ReadingValue::Number(v) if v.is_finite() && v.fract() == 0.0 => (*v as i64).to_string(),
        ReadingValue::Text(text) => {
            let text = text.trim();
            text.strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text)
                .to_string()
        }
        _ => return None,
    };
    i64::from_str_radix(&digits, 16).ok()
}

fn integer_of(value: &ReadingValue) -> Option<i64> {
    match value {
        ReadingValue::Integer(v) => Some(*v),
        ReadingValue::Number(v) if v.is_finite() => Some(v.trunc() as i64),
        ReadingValue::Bool(v) => Some(i64::from(*v)),
        ReadingValue::Text(v) => v
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| v.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(data_type: &str, scalar: f64, offset: f64, decimal: i32) -> ChannelDescriptor {
        ChannelDescriptor {
            data_type: DataType::from(data_type),
            scalar: Some(scalar),
            offset: Some(offset),
            decimal: Some(decimal),
            ..ChannelDescriptor::default()
        }
    }

    #[test]
    fn decode_adds_offset_then_scales() {
        let d = descriptor("int16", 2.0, 5.0, 0);
        assert_eq!(decode_scalar(&ReadingValue::Integer(45), &d), ReadingValue::Number(100.0));
    }

    #[test]
    fn encode_unscales_then_removes_offset() {
        let d = descriptor("int16", 2.0, 5.0, 0);
        assert_eq!(encode_scalar(&ReadingValue::Number(100.0), &d), RawValue::Integer(45));
    }

    #[test]
    fn decode_rounds_to_decimal() {
        let d = descriptor("int16", 0.1, 0.0, 1);
        assert_eq!(decode_scalar(&ReadingValue::Integer(123), &d), ReadingValue::Number(12.3));
    }

    #[test]
    fn float32_round_trip_within_decimal() {
        let d = descriptor("float32", 0.5, 3.0, 2);
        for value in [0.0, 12.34, -7.5, 999.99] {
            let raw = encode_scalar(&ReadingValue::Number(value), &d);
            let back = decode_scalar(&ReadingValue::from(&raw), &d);
            let back = back.as_f64().expect("number");
            assert!((back - value).abs() <= 0.01, "{value} -> {back}");
        }
    }

    #[test]
    fn nan_decodes_to_sentinel() {
        let d = descriptor("float32", 1.0, 0.0, 2);
        assert_eq!(decode_scalar(&ReadingValue::Number(f64::NAN), &d), ReadingValue::Null);
        assert_eq!(encode_scalar(&ReadingValue::Number(f64::NAN), &d), RawValue::Null);
    }

    #[test]
    fn non_numeric_raw_decodes_to_sentinel() {
        let d = descriptor("uint16", 1.0, 0.0, 0);
        assert_eq!(decode_scalar(&ReadingValue::Text("ERR".into()), &d), ReadingValue::Null);
    }

    #[test]
    fn unknown_data_type_is_sentinel() {
        let d = ChannelDescriptor {
            data_type: DataType::from("int64"),
            ..ChannelDescriptor::default()
        };
        assert_eq!(decode_scalar(&ReadingValue::Integer(5), &d), ReadingValue::Null);
        assert_eq!(encode_scalar(&ReadingValue::Integer(5), &d), RawValue::Null);
    }

    #[test]
    fn hex_reads_decimal_digits_as_hex() {
        let d = ChannelDescriptor {
            data_type: DataType::Hex,
            ..ChannelDescriptor::default()
        };
        assert_eq!(decode_scalar(&ReadingValue::Integer(10), &d), ReadingValue::Integer(16));
        assert_eq!(decode_scalar(&ReadingValue::Text("1F".into()), &d), ReadingValue::Integer(31));
        assert_eq!(encode_scalar(&ReadingValue::Integer(255), &d), RawValue::Text("0xff".into()));
    }

    #[test]
    fn bool_and_int32_pass_through() {
        let d = ChannelDescriptor {
            data_type: DataType::Bool,
            ..ChannelDescriptor::default()
        };
        assert_eq!(decode_scalar(&ReadingValue::Bool(true), &d), ReadingValue::Bool(true));
        assert_eq!(encode_scalar(&ReadingValue::Bool(true), &d), RawValue::Integer(1));

        let d = ChannelDescriptor {
            data_type: DataType::Int32,
            scalar: Some(10.0),
            ..ChannelDescriptor::default()
        };
        assert_eq!(decode_scalar(&ReadingValue::Integer(70_000), &d), ReadingValue::Integer(70_000));
        assert_eq!(encode_scalar(&ReadingValue::Integer(70_000), &d), RawValue::Integer(70_000));
    }

    #[test]
    fn scpi_reply_takes_array_position() {
        let d = ChannelDescriptor {
            data_type: DataType::Nr2,
            array_pos: Some(1),
            ..ChannelDescriptor::default()
        };
        assert_eq!(
            parse_scpi_reply("1.0, 12.5 ,3.0\n", &d).expect("parse"),
            ReadingValue::Number(12.5)
        );
    }

    #[test]
    fn scpi_reply_strips_nul_and_parses_integer() {
        let d = ChannelDescriptor {
            data_type: DataType::Nr1,
            ..ChannelDescriptor::default()
        };
        assert_eq!(
            parse_scpi_reply(" 42\n\0", &d).expect("parse"),
            ReadingValue::Integer(42)
        );
        assert!(parse_scpi_reply("4.2", &d).is_err());
    }

    #[test]
    fn scpi_reply_out_of_range_position_is_error() {
        let d = ChannelDescriptor {
            data_type: DataType::Nr2,
            array_pos: Some(5),
            ..ChannelDescriptor::default()
        };
        assert_eq!(
            parse_scpi_reply("1,2", &d),
            Err(CodecError::ArrayPos { pos: 5, len: 2 })
        );
    }
}
