//! SCPI 文本仪器驱动。
//!
//! 会话为带终止符的文本流（TCP socket 或串口），资源串采用 VISA 形式：
//! - `TCPIP0::<host>::<port>::SOCKET`
//! - `TCPIP0::<host>::INSTR`（端口 5025）
//! - `ASRL<path>::INSTR`（数字路径映射为 `/dev/ttyS<n>`）

use crate::driver::TransportDriver;
use crate::error::{ChannelFault, ProtocolError};
use crate::types::ChannelOutcome;
use async_trait::async_trait;
use domain::{ChannelKind, ReadingValue};
use relay_normalize::{ChannelRow, encode_scalar, parse_scpi_reply};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::time::timeout;
use tracing::debug;

/// `TCPIP::host::INSTR` 的默认端口
pub const SCPI_RAW_PORT: u16 = 5025;
/// 结构化输出配置的参数个数：mode, enable, voltage, current, power, resistance
const ANALOG_PROFILE_LEN: usize = 6;
/// 超时后清理迟到回复的等待窗口
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// SCPI 会话能力。
#[async_trait]
pub trait ScpiSession: Send {
    async fn write(&mut self, command: &str) -> Result<(), ProtocolError>;

    async fn query(&mut self, command: &str) -> Result<String, ProtocolError>;
}

/// VISA 资源串解析结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisaResource {
    Socket { host: String, port: u16 },
    Serial { path: String },
}

impl VisaResource {
    pub fn parse(resource: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = resource.trim().split("::").collect();
        let head = parts.first().copied().unwrap_or_default();
        let upper = head.to_ascii_uppercase();
        let invalid = || ProtocolError::ConfigParse(format!("unsupported VISA resource: {resource}"));

        if upper.starts_with("TCPIP") {
            let host = parts.get(1).filter(|h| !h.is_empty()).ok_or_else(invalid)?;
            let suffix = parts.last().map(|s| s.to_ascii_uppercase()).unwrap_or_default();
            let port = match (suffix.as_str(), parts.len()) {
                ("SOCKET", 4) => parts[2].parse::<u16>().map_err(|_| invalid())?,
                ("INSTR", _) => SCPI_RAW_PORT,
                _ => return Err(invalid()),
            };
            return Ok(Self::Socket {
                host: host.to_string(),
                port,
            });
        }

        if upper.starts_with("ASRL") {
            let path = &head[4..];
            if path.is_empty() {
                return Err(invalid());
            }
            let path = if path.chars().all(|c| c.is_ascii_digit()) {
                format!("/dev/ttyS{path}")
            } else {
                path.to_string()
            };
            return Ok(Self::Serial { path });
        }

        Err(invalid())
    }
}

/// 基于字节流的 SCPI 会话。
///
/// 查询超时后，下一条命令发送前先丢弃流上的残留回复。
pub struct StreamScpiSession<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    read_terminator: String,
    write_terminator: String,
    io_timeout: Duration,
    desynced: bool,
}

impl<S> StreamScpiSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// 终止符为空时使用 `\n`。
    pub fn new(
        stream: S,
        read_terminator: Option<&str>,
        write_terminator: Option<&str>,
        io_timeout: Duration,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            read_terminator: terminator_or_default(read_terminator),
            write_terminator: terminator_or_default(write_terminator),
            io_timeout,
            desynced: false,
        }
    }

    async fn drain(&mut self) -> Result<(), ProtocolError> {
        let mut scratch = [0u8; 256];
        let mut discarded = 0usize;
        loop {
            match timeout(DRAIN_WINDOW, self.reader.read(&mut scratch)).await {
                Ok(Ok(0)) => {
                    return Err(ProtocolError::Connection(
                        "instrument closed the stream".to_string(),
                    ));
                }
                Ok(Ok(n)) => discarded += n,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => break,
            }
        }
        if discarded > 0 {
            debug!(target: "relay.protocol", bytes = discarded, "scpi_stale_reply_drained");
        }
        self.desynced = false;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<(), ProtocolError> {
        let line = format!("{command}{}", self.write_terminator);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, ProtocolError> {
        let last = self.read_terminator.as_bytes().last().copied().unwrap_or(b'\n');
        let mut buf = Vec::new();
        loop {
            let read = self.reader.read_until(last, &mut buf).await?;
            if read == 0 {
                return Err(ProtocolError::Connection("instrument closed the stream".to_string()));
            }
            if buf.ends_with(self.read_terminator.as_bytes()) {
                break;
            }
        }
        buf.truncate(buf.len() - self.read_terminator.len());
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn terminator_or_default(value: Option<&str>) -> String {
    match value {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => "\n".to_string(),
    }
}

#[async_trait]
impl<S> ScpiSession for StreamScpiSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn write(&mut self, command: &str) -> Result<(), ProtocolError> {
        if self.desynced {
            self.drain().await?;
        }
        let io_timeout = self.io_timeout;
        timeout(io_timeout, self.send(command))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("scpi write after {io_timeout:?}")))?
    }

    async fn query(&mut self, command: &str) -> Result<String, ProtocolError> {
        if self.desynced {
            self.drain().await?;
        }
        let io_timeout = self.io_timeout;
        let reply = timeout(io_timeout, async {
            self.send(command).await?;
            self.receive().await
        })
        .await;
        match reply {
            Ok(result) => result,
            Err(_) => {
                self.desynced = true;
                Err(ProtocolError::Timeout(format!("scpi query after {io_timeout:?}")))
            }
        }
    }
}

pub struct ScpiDriver {
    session: Box<dyn ScpiSession>,
}

impl ScpiDriver {
    pub fn new(session: Box<dyn ScpiSession>) -> Self {
        Self { session }
    }

    async fn read_one(
        &mut self,
        row: &ChannelRow,
        use_init: bool,
    ) -> Result<ReadingValue, ChannelFault> {
        let descriptor = &row.descriptor;
        let io = descriptor.command_fragment();
        let prefix = if use_init {
            descriptor.init_text.as_deref().unwrap_or_default()
        } else {
            descriptor.request_text.as_deref().unwrap_or_default()
        };
        let reply = self.session.query(&format!("{prefix}{io}?")).await?;
        Ok(parse_scpi_reply(&reply, descriptor)?)
    }

    async fn write_one(&mut self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let descriptor = &row.descriptor;
        let io = descriptor.command_fragment();

        if descriptor.kind == ChannelKind::Analog {
            let profile = analog_profile(&row.requested)?;
            self.session.write(&format!("OUTP{io} {profile}")).await?;
            let reply = self.session.query(&format!("{io}?")).await?;
            return Ok(ReadingValue::Text(reply.trim().to_string()));
        }

        let raw = encode_scalar(&row.requested, descriptor);
        if raw.is_null() {
            return Err(ChannelFault::InvalidValue(format!("{:?}", row.requested)));
        }
        let request = descriptor.request_text.as_deref().unwrap_or_default();
        let command = format!("{request}{io} {}", raw.to_command_text());
        debug!(target: "relay.protocol", command = %command, "scpi_write");
        self.session.write(&command).await?;
        let reply = self.session.query(&format!("{request}{io}?")).await?;
        Ok(parse_scpi_reply(&reply, descriptor)?)
    }
}

/// 六个逗号分隔的浮点参数，按规范格式重新拼接。
fn analog_profile(value: &ReadingValue) -> Result<String, ChannelFault> {
    let ReadingValue::Text(text) = value else {
        return Err(ChannelFault::InvalidValue(format!(
            "analog output expects {ANALOG_PROFILE_LEN} comma-separated values"
        )));
    };
    let params = text
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ChannelFault::InvalidValue(text.clone()))?;
    if params.len() != ANALOG_PROFILE_LEN {
        return Err(ChannelFault::InvalidValue(text.clone()));
    }
    Ok(params
        .iter()
        .map(|p| format!("{p:?}"))
        .collect::<Vec<_>>()
        .join(","))
}

#[async_trait]
impl TransportDriver for ScpiDriver {
    fn name(&self) -> &'static str {
        "SCPI"
    }

    /// 每次读请求中首个 `Init_Func` 通道改用 `Init_Text` 查询。
    async fn read(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        let mut initialized = false;
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let use_init = row.descriptor.init_func && !initialized;
            let result = self.read_one(row, use_init).await;
            if use_init {
                initialized = true;
            }
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
    fn visa_socket_resource() {
        assert_eq!(
            VisaResource::parse("TCPIP0::10.0.0.5::5555::SOCKET").expect("parse"),
            VisaResource::Socket {
                host: "10.0.0.5".into(),
                port: 5555
            }
        );
        assert_eq!(
            VisaResource::parse("TCPIP::psu.lab::INSTR").expect("parse"),
            VisaResource::Socket {
                host: "psu.lab".into(),
                port: SCPI_RAW_PORT
            }
        );
    }

    #[test]
    fn visa_serial_resource() {
        assert_eq!(
            VisaResource::parse("ASRL3::INSTR").expect("parse"),
            VisaResource::Serial {
                path: "/dev/ttyS3".into()
            }
        );
        assert_eq!(
            VisaResource::parse("ASRL/dev/ttyUSB0::INSTR").expect("parse"),
            VisaResource::Serial {
                path: "/dev/ttyUSB0".into()
            }
        );
        assert!(VisaResource::parse("GPIB0::12::INSTR").is_err());
    }

    #[test]
    fn analog_profile_requires_six_floats() {
        let ok = analog_profile(&ReadingValue::Text("1,1,5,0.5,10,0".into())).expect("profile");
        assert_eq!(ok, "1.0,1.0,5.0,0.5,10.0,0.0");
        assert!(analog_profile(&ReadingValue::Text("1,2,3".into())).is_err());
        assert!(analog_profile(&ReadingValue::Number(1.0)).is_err());
    }

    #[tokio::test]
    async fn stream_session_honours_terminators() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut session =
            StreamScpiSession::new(client, Some("\r\n"), Some("\r\n"), Duration::from_secs(1));

        let instrument = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = [0u8; 64];
            let n = server.read(&mut buf).await.expect("read");
            server.write_all(b"+1.25E+00\r\n").await.expect("write");
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let reply = session.query("MEAS:VOLT?").await.expect("query");
        assert_eq!(reply, "+1.25E+00");
        assert_eq!(instrument.await.expect("join"), "MEAS:VOLT?\r\n");
    }

    #[tokio::test]
    async fn late_reply_is_discarded_before_next_query() {
        use tokio::io::AsyncReadExt;
        let (client, mut server) = tokio::io::duplex(256);
        let mut session =
            StreamScpiSession::new(client, Some("\n"), Some("\n"), Duration::from_millis(50));
        let (timed_out_tx, timed_out_rx) = tokio::sync::oneshot::channel::<()>();
        let (late_tx, late_rx) = tokio::sync::oneshot::channel::<()>();

        let instrument = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            server.read(&mut buf).await.expect("read first");
            timed_out_rx.await.expect("timeout signal");
            server.write_all(b"+1.00E+00\n").await.expect("late reply");
            late_tx.send(()).expect("late signal");
            let n = server.read(&mut buf).await.expect("read second");
            server.write_all(b"+2.00E+00\n").await.expect("reply");
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let err = session.query("MEAS:VOLT?").await.expect_err("timeout");
        assert!(matches!(err, ProtocolError::Timeout(_)));
        timed_out_tx.send(()).expect("signal");
        late_rx.await.expect("late written");

        let reply = session.query("MEAS:CURR?").await.expect("query");
        assert_eq!(reply, "+2.00E+00");
        assert_eq!(instrument.await.expect("join"), "MEAS:CURR?\n");
    }
}
