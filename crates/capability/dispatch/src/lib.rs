//! 请求路由。
//!
//! 每条入站消息独立处理：毒丸 → 结束进程；总线直通设备按 Topic 分支；
//! 其余传输解析 `Read/Write` 后交给选定驱动。结果信封回发到
//! `Relay/Data/<Equipment>`，单通道故障发到 CommIssue，请求级故障发到
//! ServerIssue 后吞掉，进程继续运行。

use bus_contract::{
    BusError, BusPublisher, ContractError, Direction, RequestPayload, SHUTDOWN_NOTICE, Topics,
    envelope_payload, issue_payload,
};
use domain::{EquipmentConfig, ResultEnvelope, capture_time};
use relay_normalize::{ChannelSetError, resolve};
use relay_protocol::{ChannelFault, ProtocolError, Transport, collect};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 请求级错误。
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Payload(#[from] ContractError),
    #[error(transparent)]
    Channels(#[from] ChannelSetError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{transport} does not support {direction} requests")]
    Unsupported {
        transport: &'static str,
        direction: Direction,
    },
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// 单条消息的处理结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// 结果信封已回发
    Published { readings: usize, faults: usize },
    /// 请求被拒绝，已发布 ServerIssue
    Rejected(String),
    /// 毒丸：调用方应退出进程
    Shutdown,
}

/// 单台设备的请求路由器，独占其传输。
pub struct Router {
    config: EquipmentConfig,
    topics: Topics,
    transport: Transport,
    publisher: Arc<dyn BusPublisher>,
}

impl Router {
    pub fn new(config: EquipmentConfig, transport: Transport, publisher: Arc<dyn BusPublisher>) -> Self {
        let topics = Topics::for_name(config.name());
        Self {
            config,
            topics,
            transport,
            publisher,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// 处理一条入站消息。错误在此处发布并吞掉。
    pub async fn handle(&mut self, topic: &str, payload: &[u8]) -> RouteOutcome {
        if topic == self.topics.poison_pill {
            warn!(target: "relay.dispatch", equipment = %self.config.name(), "poison_pill_received");
            self.server_issue(SHUTDOWN_NOTICE).await;
            return RouteOutcome::Shutdown;
        }

        match self.route(topic, payload).await {
            Ok(outcome) => outcome,
            Err(err) => {
                relay_telemetry::record_request_fault();
                let message = format!("[Received bad message or instrument comms: {err}]");
                warn!(
                    target: "relay.dispatch",
                    equipment = %self.config.name(),
                    topic = %topic,
                    error = %err,
                    "request_rejected"
                );
                self.server_issue(&message).await;
                RouteOutcome::Rejected(message)
            }
        }
    }

    async fn route(&mut self, topic: &str, payload: &[u8]) -> Result<RouteOutcome, RouteError> {
        let time = capture_time();
        let envelope = match &mut self.transport {
            Transport::Bus(bus) => {
                if bus.is_data_topic(topic) {
                    bus.ingest_data(payload, time)?
                } else {
                    let request = RequestPayload::from_slice(payload)?;
                    match request.direction()? {
                        Direction::Read => {
                            let rows = resolve(&request.channels, &self.config)?;
                            bus.acknowledge(&rows, time)
                        }
                        Direction::Write => bus.forward(&request, time).await?,
                    }
                }
            }
            Transport::Device(driver) => {
                let request = RequestPayload::from_slice(payload)?;
                let direction = request.direction()?;
                if !driver.supports(direction) {
                    return Err(RouteError::Unsupported {
                        transport: driver.name(),
                        direction,
                    });
                }
                let rows = resolve(&request.channels, &self.config)?;
                debug!(
                    target: "relay.dispatch",
                    transport = driver.name(),
                    direction = %direction,
                    channels = rows.len(),
                    "request_dispatch"
                );
                let outcomes = match direction {
                    Direction::Read => driver.read(&rows).await,
                    Direction::Write => driver.write(&rows).await,
                };
                let collected = collect(self.config.name(), time, outcomes);
                let transport = driver.name();
                for (tagnum, fault) in &collected.faults {
                    self.comm_issue(transport, direction, tagnum, fault).await;
                }
                let faults = collected.faults.len();
                let readings = self.publish_envelope(&collected.envelope).await?;
                return Ok(RouteOutcome::Published { readings, faults });
            }
        };
        let readings = self.publish_envelope(&envelope).await?;
        Ok(RouteOutcome::Published { readings, faults: 0 })
    }

    async fn publish_envelope(&self, envelope: &ResultEnvelope) -> Result<usize, RouteError> {
        let payload = envelope_payload(envelope)?;
        self.publisher.publish(&self.topics.data, payload).await?;
        relay_telemetry::record_request_routed();
        relay_telemetry::record_readings_published(envelope.len() as u64);
        info!(
            target: "relay.dispatch",
            equipment = %self.config.name(),
            readings = envelope.len(),
            "result_published"
        );
        Ok(envelope.len())
    }

    async fn comm_issue(&self, transport: &str, direction: Direction, tagnum: &str, fault: &ChannelFault) {
        relay_telemetry::record_channel_fault();
        let verb = match direction {
            Direction::Read => "Read",
            Direction::Write => "Write",
        };
        let message = format!("Issue with {transport} {verb} [{tagnum}]: {fault}");
        warn!(
            target: "relay.dispatch",
            equipment = %self.config.name(),
            tagnum = %tagnum,
            error = %fault,
            "channel_fault"
        );
        if let Err(err) = self
            .publisher
            .publish(&self.topics.comm_issue, issue_payload(&message))
            .await
        {
            warn!(target: "relay.dispatch", error = %err, "comm_issue_publish_failed");
        }
    }

    /// 发布 ServerIssue；发布失败只记录日志。
    pub async fn server_issue(&self, message: &str) {
        if let Err(err) = self
            .publisher
            .publish(&self.topics.server_issue, issue_payload(message))
            .await
        {
            warn!(target: "relay.dispatch", error = %err, "server_issue_publish_failed");
        }
    }
}
