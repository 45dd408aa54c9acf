//! 值规范化：原始线上值 ↔ 工程值、寄存器载荷、通道集解析。
//!
//! - [`codec`]：按数据类型缩放/反缩放（decode 先加偏移后乘系数，encode 反之）
//! - [`registers`]：字节序/字序感知的寄存器载荷构建与解码
//! - [`channel_set`]：请求通道解析为有序工作集

pub mod channel_set;
pub mod codec;
pub mod registers;

pub use channel_set::{ChannelGroup, ChannelRow, ChannelSetError, group_by_kind, resolve};
pub use codec::{CodecError, RawValue, decode_scalar, encode_scalar, parse_scpi_reply};
pub use registers::{WireOrder, build_registers, decode_registers, f16_bits_to_f32, f32_to_f16_bits};
