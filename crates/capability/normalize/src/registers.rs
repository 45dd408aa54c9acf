//! 寄存器载荷构建与解码。
//!
//! 值先按大端展开为 16 位字序列；字序为 Little 时整体反转字顺序，
//! 字节序为 Little 时交换每个字内的两个字节。解码为其严格逆过程。

use crate::codec::{CodecError, RawValue};
use domain::{ChannelDescriptor, DataType, Endian, ReadingValue};

/// 设备级字节序 + 字序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireOrder {
    pub byte: Endian,
    pub word: Endian,
}

impl WireOrder {
    pub fn new(byte: Endian, word: Endian) -> Self {
        Self { byte, word }
    }

    fn to_registers(self, bytes: &[u8]) -> Vec<u16> {
        let mut words: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect();
        if self.word == Endian::Little {
            words.reverse();
        }
        if self.byte == Endian::Little {
            for word in &mut words {
                *word = word.swap_bytes();
            }
        }
        words
    }

    fn to_bytes(self, registers: &[u16]) -> Vec<u8> {
        let mut words: Vec<u16> = registers.to_vec();
        if self.byte == Endian::Little {
            for word in &mut words {
                *word = word.swap_bytes();
            }
        }
        if self.word == Endian::Little {
            words.reverse();
        }
        words.iter().flat_map(|word| word.to_be_bytes()).collect()
    }
}

/// 构建写入载荷。不支持的类型返回空载荷。
pub fn build_registers(raw: &RawValue, data_type: &DataType, order: WireOrder) -> Vec<u16> {
    let bytes: Vec<u8> = match data_type {
        DataType::Bool | DataType::Bit => match raw.as_i64() {
            Some(v) => u16::from(v != 0).to_be_bytes().to_vec(),
            None => return Vec::new(),
        },
        DataType::Int16 => match raw.as_i64() {
            Some(v) => (v as i16).to_be_bytes().to_vec(),
            None => return Vec::new(),
        },
        DataType::Uint16 => match raw.as_i64() {
            Some(v) => (v as u16).to_be_bytes().to_vec(),
            None => return Vec::new(),
        },
        DataType::Int32 => match raw.as_i64() {
            Some(v) => (v as i32).to_be_bytes().to_vec(),
            None => return Vec::new(),
        },
        DataType::Float16 => match raw.as_f64() {
            Some(v) => f32_to_f16_bits(v as f32).to_be_bytes().to_vec(),
            None => return Vec::new(),
        },
        DataType::Float32 => match raw.as_f64() {
            Some(v) => (v as f32).to_bits().to_be_bytes().to_vec(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    order.to_registers(&bytes)
}

/// 解码读回的寄存器，得到待缩放的原始值。
pub fn decode_registers(
    registers: &[u16],
    descriptor: &ChannelDescriptor,
    order: WireOrder,
) -> Result<ReadingValue, CodecError> {
    let width = match descriptor.data_type {
        DataType::Int32 | DataType::Float32 => 2,
        _ => 1,
    };
    if registers.len() < width {
        return Err(CodecError::ShortPayload {
            expected: width,
            actual: registers.len(),
        });
    }
    let bytes = order.to_bytes(&registers[..width]);
    let first = u16::from_be_bytes([bytes[0], bytes[1]]);

    Ok(match &descriptor.data_type {
        DataType::Bool => ReadingValue::Bool(first != 0),
        DataType::Bit => {
            let start = descriptor.bit_start.unwrap_or(0).min(15);
            let end = descriptor.bit_end.unwrap_or(start).clamp(start, 15);
            let span = u32::from(end - start) + 1;
            let mask = if span >= 16 { u16::MAX } else { (1u16 << span) - 1 };
            ReadingValue::Integer(i64::from((first >> start) & mask))
        }
        DataType::Int16 => ReadingValue::Integer(i64::from(first as i16)),
        DataType::Uint16 => ReadingValue::Integer(i64::from(first)),
        DataType::Float16 => ReadingValue::Number(f64::from(f16_bits_to_f32(first))),
        DataType::Int32 => {
            ReadingValue::Integer(i64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
        }
        DataType::Float32 => ReadingValue::Number(f64::from(f32::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        // 其余类型按首个寄存器原值交给标量解码
        _ => ReadingValue::Integer(i64::from(first)),
    })
}

/// IEEE 754 半精度 → 单精度。
pub fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exponent = u32::from((bits >> 10) & 0x1f);
    let fraction = u32::from(bits & 0x3ff);
    match (exponent, fraction) {
        (0, 0) => f32::from_bits(sign),
        (0, _) => {
            // 非规格化数：fraction * 2^-24
            let magnitude = fraction as f32 / 16_777_216.0;
            if sign != 0 { -magnitude } else { magnitude }
        }
        (0x1f, _) => f32::from_bits(sign | 0x7f80_0000 | (fraction << 13)),
        _ => f32::from_bits(sign | ((exponent + 112) << 23) | (fraction << 13)),
    }
}

/// 单精度 → IEEE 754 半精度（就近舍入，平局取偶）。
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x7f_ffff;

    if exponent == 0xff {
        let nan = if mantissa != 0 { 0x200 } else { 0 };
        return sign | 0x7c00 | nan;
    }
    let half_exponent = exponent - 127 + 15;
    if half_exponent >= 0x1f {
        return sign | 0x7c00;
    }
    if half_exponent <= 0 {
        if half_exponent < -10 {
            return sign;
        }
        let full = mantissa | 0x80_0000;
        let shift = (14 - half_exponent) as u32;
        let half_way = 1u32 << (shift - 1);
        let remainder = full & ((1u32 << shift) - 1);
        let mut half = full >> shift;
        if remainder > half_way || (remainder == half_way && half & 1 == 1) {
            half += 1;
        }
        return sign | half as u16;
    }

    let mut half = ((half_exponent as u32) << 10) | (mantissa >> 13);
    let remainder = mantissa & 0x1fff;
    if remainder > 0x1000 || (remainder == 0x1000 && half & 1 == 1) {
        half += 1;
    }
    sign | half as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(data_type: DataType) -> ChannelDescriptor {
        ChannelDescriptor {
            data_type,
            ..ChannelDescriptor::default()
        }
    }

    #[test]
    fn float32_word_order_little_swaps_words() {
        let big = WireOrder::default();
        let little_words = WireOrder::new(Endian::Big, Endian::Little);
        let value = RawValue::Float(1.5);
        // 1.5f32 = 0x3FC00000
        assert_eq!(build_registers(&value, &DataType::Float32, big), vec![0x3FC0, 0x0000]);
        assert_eq!(
            build_registers(&value, &DataType::Float32, little_words),
            vec![0x0000, 0x3FC0]
        );
    }

    #[test]
    fn byte_order_little_swaps_bytes_within_words() {
        let order = WireOrder::new(Endian::Little, Endian::Big);
        assert_eq!(
            build_registers(&RawValue::Integer(0x1234), &DataType::Uint16, order),
            vec![0x3412]
        );
        let decoded = decode_registers(&[0x3412], &channel(DataType::Uint16), order).expect("decode");
        assert_eq!(decoded, ReadingValue::Integer(0x1234));
    }

    #[test]
    fn int32_decodes_with_all_orders() {
        let orders = [
            WireOrder::new(Endian::Big, Endian::Big),
            WireOrder::new(Endian::Big, Endian::Little),
            WireOrder::new(Endian::Little, Endian::Big),
            WireOrder::new(Endian::Little, Endian::Little),
        ];
        for order in orders {
            let registers = build_registers(&RawValue::Integer(-123_456), &DataType::Int32, order);
            assert_eq!(registers.len(), 2);
            let decoded = decode_registers(&registers, &channel(DataType::Int32), order).expect("decode");
            assert_eq!(decoded, ReadingValue::Integer(-123_456));
        }
    }

    #[test]
    fn bit_field_is_extracted_lsb_first() {
        let descriptor = ChannelDescriptor {
            data_type: DataType::Bit,
            bit_start: Some(4),
            bit_end: Some(6),
            ..ChannelDescriptor::default()
        };
        // 0b0101_0000 → bits 4..=6 = 0b101
        let decoded = decode_registers(&[0b0101_0000], &descriptor, WireOrder::default()).expect("decode");
        assert_eq!(decoded, ReadingValue::Integer(0b101));
    }

    #[test]
    fn unsupported_type_builds_empty_payload() {
        assert!(build_registers(&RawValue::Integer(1), &DataType::Hex, WireOrder::default()).is_empty());
        assert!(build_registers(&RawValue::Null, &DataType::Int16, WireOrder::default()).is_empty());
    }

    #[test]
    fn short_payload_is_error() {
        let err = decode_registers(&[1], &channel(DataType::Float32), WireOrder::default());
        assert_eq!(err, Err(CodecError::ShortPayload { expected: 2, actual: 1 }));
    }

    #[test]
    fn half_precision_round_trip() {
        for value in [0.0f32, 1.0, -2.5, 65504.0, 6.103_515_625e-5] {
            assert_eq!(f16_bits_to_f32(f32_to_f16_bits(value)), value);
        }
        assert_eq!(f32_to_f16_bits(1.0), 0x3C00);
        assert_eq!(f32_to_f16_bits(f32::INFINITY), 0x7C00);
        assert!(f16_bits_to_f32(f32_to_f16_bits(f32::NAN)).is_nan());
    }
}
