//! Opto22 OptoMMP 驱动。
//!
//! 通道以 `(Module, Channel)` 寻址，点位区间为 `base + 0x1000*Module + 0x40*Channel`。
//! 传输为 IEEE-1394 风格的块读写包（TCP 2001 端口）。

use crate::driver::TransportDriver;
use crate::error::{ChannelFault, ProtocolError};
use crate::types::ChannelOutcome;
use async_trait::async_trait;
use domain::{ChannelDescriptor, ChannelKind, ReadingValue};
use relay_normalize::{ChannelRow, decode_scalar, encode_scalar};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

pub const OPTO_MMP_PORT: u16 = 2001;

const DIGITAL_READ_BASE: u32 = 0xF040_0000;
const ANALOG_READ_BASE: u32 = 0xF060_0000;
const DIGITAL_WRITE_BASE: u32 = 0xF090_0000;
const ANALOG_WRITE_BASE: u32 = 0xF0A0_0000;
const FEATURE_BASE: u32 = 0xF01E_0010;
/// 特性块：五个大端 f32，取第五个
const FEATURE_LEN: usize = 20;
const FEATURE_INDEX: usize = 4;

const TCODE_WRITE_BLOCK: u8 = 0x1;
const TCODE_WRITE_RESPONSE: u8 = 0x2;
const TCODE_READ_BLOCK: u8 = 0x5;
const TCODE_READ_QUADLET_RESPONSE: u8 = 0x6;
const TCODE_READ_BLOCK_RESPONSE: u8 = 0x7;
const HEADER_LEN: usize = 16;

/// OptoMMP 内存读写能力。
#[async_trait]
pub trait MmpClient: Send {
    async fn read_block(&mut self, address: u32, len: usize) -> Result<Vec<u8>, ProtocolError>;

    async fn write_block(&mut self, address: u32, data: &[u8]) -> Result<(), ProtocolError>;
}

/// 点位偏移。
pub fn point_address(base: u32, module: u32, channel: u32) -> u32 {
    base.wrapping_add(module.wrapping_mul(0x1000))
        .wrapping_add(channel.wrapping_mul(0x40))
}

fn header(label: u8, tcode: u8, address: u32, data_len: u16) -> [u8; HEADER_LEN] {
    let mut packet = [0u8; HEADER_LEN];
    packet[2] = label << 2;
    packet[3] = tcode << 4;
    packet[6..8].copy_from_slice(&0xFFFFu16.to_be_bytes());
    packet[8..12].copy_from_slice(&address.to_be_bytes());
    packet[12..14].copy_from_slice(&data_len.to_be_bytes());
    packet
}

/// 块读请求包。
pub fn read_block_request(label: u8, address: u32, len: u16) -> [u8; HEADER_LEN] {
    header(label, TCODE_READ_BLOCK, address, len)
}

/// 块写请求包。
pub fn write_block_request(label: u8, address: u32, data: &[u8]) -> Vec<u8> {
    let mut packet = header(label, TCODE_WRITE_BLOCK, address, data.len() as u16).to_vec();
    packet.extend_from_slice(data);
    packet
}

/// 响应码位于第 7 字节高 4 位，非零为设备拒绝。
pub fn response_code(header: &[u8]) -> Result<(), ProtocolError> {
    let rcode = header.get(6).map(|b| b >> 4).unwrap_or(0xF);
    if rcode == 0 {
        Ok(())
    } else {
        Err(ProtocolError::Rejected(format!("optommp rcode {rcode}")))
    }
}

/// 超时后清理迟到字节的等待窗口
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// 流上的 OptoMMP 客户端（默认 TCP）。
///
/// 响应按事务标签与请求配对，标签不符的迟到响应被丢弃；
/// 超时后下一次请求前先清空流上的残留字节。
pub struct TcpMmpClient<S = TcpStream> {
    stream: S,
    label: u8,
    io_timeout: Duration,
    desynced: bool,
}

impl<S> TcpMmpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream,
            label: 0,
            io_timeout,
            desynced: false,
        }
    }

    fn next_label(&mut self) -> u8 {
        self.label = (self.label + 1) & 0x3F;
        self.label
    }

    async fn drain(&mut self) -> Result<(), ProtocolError> {
        let mut scratch = [0u8; 256];
        let mut discarded = 0usize;
        loop {
            match timeout(DRAIN_WINDOW, self.stream.read(&mut scratch)).await {
                Ok(Ok(0)) => {
                    return Err(ProtocolError::Connection("optommp stream closed".to_string()));
                }
                Ok(Ok(n)) => discarded += n,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => break,
            }
        }
        if discarded > 0 {
            debug!(target: "relay.protocol", bytes = discarded, "optommp_stale_bytes_drained");
        }
        self.desynced = false;
        Ok(())
    }

    /// 读取一帧响应，返回其事务标签与载荷。
    async fn read_response(&mut self) -> Result<(u8, Result<Vec<u8>, ProtocolError>), ProtocolError> {
        let mut head = [0u8; 12];
        self.stream.read_exact(&mut head).await?;
        let label = head[2] >> 2;

        let data = match head[3] >> 4 {
            TCODE_WRITE_RESPONSE => Vec::new(),
            TCODE_READ_QUADLET_RESPONSE => {
                let mut data = [0u8; 4];
                self.stream.read_exact(&mut data).await?;
                data.to_vec()
            }
            TCODE_READ_BLOCK_RESPONSE => {
                let mut tail = [0u8; 4];
                self.stream.read_exact(&mut tail).await?;
                let len = usize::from(u16::from_be_bytes([tail[0], tail[1]]));
                let mut data = vec![0u8; len];
                self.stream.read_exact(&mut data).await?;
                data
            }
            other => {
                return Err(ProtocolError::DataParse(format!(
                    "unexpected optommp tcode {other:#x}"
                )));
            }
        };
        Ok((label, response_code(&head).map(|()| data)))
    }

    async fn exchange(&mut self, label: u8, packet: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.stream.write_all(packet).await?;
        loop {
            let (received, result) = self.read_response().await?;
            if received == label {
                return result;
            }
            debug!(
                target: "relay.protocol",
                expected = label,
                received,
                "optommp_stale_response_dropped"
            );
        }
    }

    async fn transact(
        &mut self,
        packet: &[u8],
        label: u8,
        op: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        if self.desynced {
            self.drain().await?;
        }
        let io_timeout = self.io_timeout;
        match timeout(io_timeout, self.exchange(label, packet)).await {
            Ok(result) => result,
            Err(_) => {
                self.desynced = true;
                Err(ProtocolError::Timeout(format!("optommp {op} after {io_timeout:?}")))
            }
        }
    }
}

#[async_trait]
impl<S> MmpClient for TcpMmpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_block(&mut self, address: u32, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let label = self.next_label();
        let packet = read_block_request(label, address, len as u16);
        let data = self.transact(&packet, label, "read").await?;
        if data.len() < len {
            return Err(ProtocolError::DataParse(format!(
                "optommp read returned {} of {len} bytes",
                data.len()
            )));
        }
        Ok(data)
    }

    async fn write_block(&mut self, address: u32, data: &[u8]) -> Result<(), ProtocolError> {
        let label = self.next_label();
        let packet = write_block_request(label, address, data);
        self.transact(&packet, label, "write").await?;
        Ok(())
    }
}

pub struct Opto22Driver {
    client: Box<dyn MmpClient>,
}

fn location(descriptor: &ChannelDescriptor) -> Result<(u32, u32), ChannelFault> {
    let module = descriptor.module.ok_or(ChannelFault::MissingField("Module"))?;
    let channel = descriptor.channel.ok_or(ChannelFault::MissingField("Channel"))?;
    Ok((module, channel))
}

fn be_f32(bytes: &[u8]) -> Option<f32> {
    bytes
        .get(..4)
        .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

impl Opto22Driver {
    pub fn new(client: Box<dyn MmpClient>) -> Self {
        Self { client }
    }

    async fn read_raw(&mut self, descriptor: &ChannelDescriptor) -> Result<ReadingValue, ChannelFault> {
        let (module, channel) = location(descriptor)?;
        match descriptor.kind {
            ChannelKind::Analog => {
                let address = point_address(ANALOG_READ_BASE, module, channel);
                let data = self.client.read_block(address, 4).await?;
                let value = be_f32(&data).ok_or_else(|| short_read(data.len()))?;
                Ok(ReadingValue::Number(f64::from(value)))
            }
            ChannelKind::Digital => {
                let address = point_address(DIGITAL_READ_BASE, module, channel);
                let data = self.client.read_block(address, 4).await?;
                let state = data
                    .get(..4)
                    .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                    .ok_or_else(|| short_read(data.len()))?;
                Ok(ReadingValue::Integer(i64::from(state != 0)))
            }
            ChannelKind::Feature => {
                let address = point_address(FEATURE_BASE, module, channel);
                let data = self.client.read_block(address, FEATURE_LEN).await?;
                let value = data
                    .get(FEATURE_INDEX * 4..)
                    .and_then(be_f32)
                    .ok_or_else(|| short_read(data.len()))?;
                Ok(ReadingValue::Number(f64::from(value)))
            }
            _ => Err(ChannelFault::InvalidValue(format!(
                "unsupported Opto22 channel type {}",
                descriptor.kind
            ))),
        }
    }

    async fn read_one(&mut self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let raw = self.read_raw(&row.descriptor).await?;
        Ok(decode_scalar(&raw, &row.descriptor))
    }

    async fn write_one(&mut self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let descriptor = &row.descriptor;
        let (module, channel) = location(descriptor)?;
        let raw = encode_scalar(&row.requested, descriptor);
        match descriptor.kind {
            ChannelKind::Analog => {
                let value = raw
                    .as_f64()
                    .ok_or_else(|| ChannelFault::InvalidValue(format!("{:?}", row.requested)))?;
                let address = point_address(ANALOG_WRITE_BASE, module, channel);
                self.client
                    .write_block(address, &(value as f32).to_be_bytes())
                    .await?;
            }
            ChannelKind::Digital => {
                let on = raw
                    .as_i64()
                    .ok_or_else(|| ChannelFault::InvalidValue(format!("{:?}", row.requested)))?
                    != 0;
                // 开在 +0，关在 +4
                let address = point_address(DIGITAL_WRITE_BASE, module, channel) + if on { 0 } else { 4 };
                self.client.write_block(address, &1u32.to_be_bytes()).await?;
            }
            _ => {
                return Err(ChannelFault::InvalidValue(format!(
                    "Opto22 channel type {} is read-only",
                    descriptor.kind
                )));
            }
        }
        debug!(target: "relay.protocol", module, channel, "opto22_write");
        self.read_one(row).await
    }
}

fn short_read(len: usize) -> ChannelFault {
    ChannelFault::Transport(format!("optommp short read ({len} bytes)"))
}

#[async_trait]
impl TransportDriver for Opto22Driver {
    fn name(&self) -> &'static str {
        "Opto"
    }

    async fn read(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let result = self.read_one(row).await;
            outcomes.push(ChannelOutcome {
                tagnum: row.tagnum.clone(),
                result,
            });
        }
        outcomes
    }

    async fn write(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let result = self.write_one(row).await;
            outcomes.push(ChannelOutcome {
                tagnum: row.tagnum.clone(),
                result,
            });
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_addresses() {
        assert_eq!(point_address(ANALOG_READ_BASE, 2, 3), 0xF060_20C0);
        assert_eq!(point_address(FEATURE_BASE, 1, 1), 0xF01E_1050);
    }

    #[test]
    fn read_request_layout() {
        let packet = read_block_request(3, 0xF060_0040, 4);
        assert_eq!(packet[2], 3 << 2);
        assert_eq!(packet[3], 0x50);
        assert_eq!(&packet[6..8], &[0xFF, 0xFF]);
        assert_eq!(&packet[8..12], &[0xF0, 0x60, 0x00, 0x40]);
        assert_eq!(&packet[12..14], &[0x00, 0x04]);
    }

    #[test]
    fn write_request_carries_payload() {
        let packet = write_block_request(1, 0xF0A0_0000, &1.5f32.to_be_bytes());
        assert_eq!(packet.len(), HEADER_LEN + 4);
        assert_eq!(packet[3], 0x10);
        assert_eq!(&packet[HEADER_LEN..], &[0x3F, 0xC0, 0x00, 0x00]);
    }

    #[test]
    fn nonzero_rcode_is_rejected() {
        let mut head = [0u8; 12];
        assert!(response_code(&head).is_ok());
        head[6] = 0x70;
        assert!(matches!(response_code(&head), Err(ProtocolError::Rejected(_))));
    }

    fn block_response(label: u8, data: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; HEADER_LEN];
        frame[2] = label << 2;
        frame[3] = TCODE_READ_BLOCK_RESPONSE << 4;
        frame[12..14].copy_from_slice(&(data.len() as u16).to_be_bytes());
        frame.extend_from_slice(data);
        frame
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_the_next_request() {
        let (client_side, mut device) = tokio::io::duplex(1024);
        let mut client = TcpMmpClient::new(client_side, Duration::from_millis(50));
        let (late_tx, late_rx) = tokio::sync::oneshot::channel::<()>();

        let device_task = tokio::spawn(async move {
            let mut request = [0u8; HEADER_LEN];
            device.read_exact(&mut request).await.expect("first request");
            let first_label = request[2] >> 2;
            late_rx.await.expect("signal");
            // 第一个请求的迟到响应
            device
                .write_all(&block_response(first_label, &1.0f32.to_be_bytes()))
                .await
                .expect("late reply");
            device.read_exact(&mut request).await.expect("second request");
            let second_label = request[2] >> 2;
            device
                .write_all(&block_response(second_label, &2.0f32.to_be_bytes()))
                .await
                .expect("reply");
        });

        let first = client.read_block(ANALOG_READ_BASE, 4).await;
        assert!(matches!(first, Err(ProtocolError::Timeout(_))));
        late_tx.send(()).expect("send");

        let second = client.read_block(ANALOG_READ_BASE + 0x40, 4).await.expect("second");
        assert_eq!(second, 2.0f32.to_be_bytes().to_vec());
        device_task.await.expect("device");
    }

    #[tokio::test]
    async fn mismatched_label_is_skipped() {
        let (client_side, mut device) = tokio::io::duplex(1024);
        let mut client = TcpMmpClient::new(client_side, Duration::from_secs(1));

        let device_task = tokio::spawn(async move {
            let mut request = [0u8; HEADER_LEN];
            device.read_exact(&mut request).await.expect("request");
            let label = request[2] >> 2;
            let mut frames = block_response(label.wrapping_add(7) & 0x3F, &9.0f32.to_be_bytes());
            frames.extend(block_response(label, &3.0f32.to_be_bytes()));
            device.write_all(&frames).await.expect("reply");
        });

        let data = client.read_block(ANALOG_READ_BASE, 4).await.expect("read");
        assert_eq!(data, 3.0f32.to_be_bytes().to_vec());
        device_task.await.expect("device");
    }
}
