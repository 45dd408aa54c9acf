//! MQTT 总线接入。
//!
//! 事件循环在独立任务中轮询 broker：连上（ConnAck）后订阅会话 Topic 并发布心跳，
//! 收到的消息经有界通道交给进程主循环逐条处理。

use async_trait::async_trait;
use bus_contract::{ALIVE_TOPIC, AlivePayload, BusError, BusPublisher, DATA_WILDCARD, Topics};
use relay_config::BrokerConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 入站消息通道容量
const INBOUND_CAPACITY: usize = 64;
/// 断线后的重试间隔
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// 接入错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("broker error: {0}")]
    Broker(String),
    #[error("inbound channel closed")]
    Closed,
}

/// 入站消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// 会话：连上后订阅的 Topic 与心跳载荷。
#[derive(Debug, Clone, PartialEq)]
pub struct BusSession {
    pub client_prefix: String,
    pub subscriptions: Vec<String>,
    pub alive: AlivePayload,
}

impl BusSession {
    /// 仪器进程：请求 + 毒丸，总线直通设备另订阅其数据读 Topic。
    pub fn instrument(name: &str, data_read_topic: Option<&str>) -> Self {
        let topics = Topics::for_name(name);
        let mut subscriptions = vec![topics.request, topics.poison_pill];
        if let Some(topic) = data_read_topic.filter(|t| !t.is_empty()) {
            subscriptions.push(topic.to_string());
        }
        Self {
            client_prefix: format!("relay-instrument-{name}"),
            subscriptions,
            alive: AlivePayload::instrument(name),
        }
    }

    /// 入库进程：全部结果 + 自身毒丸。
    pub fn recorder(name: &str) -> Self {
        let topics = Topics::for_name(name);
        Self {
            client_prefix: format!("relay-recorder-{name}"),
            subscriptions: vec![DATA_WILDCARD.to_string(), topics.poison_pill],
            alive: AlivePayload::database(name),
        }
    }
}

/// 由 broker 配置构建连接参数，client_id 带随机后缀。
pub fn mqtt_options(broker: &BrokerConfig, client_prefix: &str) -> MqttOptions {
    let client_id = format!("{client_prefix}-{}", uuid::Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options.set_keep_alive(Duration::from_secs(broker.keep_alive_seconds.max(5)));
    if let (Some(username), Some(password)) = (broker.username.as_ref(), broker.password.as_ref()) {
        options.set_credentials(username, password);
    }
    options
}

/// rumqttc 发布者。
#[derive(Clone)]
pub struct RumqttPublisher {
    client: AsyncClient,
}

impl RumqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    pub async fn disconnect(&self) -> Result<(), BusError> {
        self.client
            .disconnect()
            .await
            .map_err(|err| BusError::Connection(err.to_string()))
    }
}

#[async_trait]
impl BusPublisher for RumqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|err| BusError::Publish(err.to_string()))
    }
}

/// 已建立的总线连接。
pub struct BusConnection {
    pub publisher: RumqttPublisher,
    pub inbound: mpsc::Receiver<InboundMessage>,
    pub event_loop: JoinHandle<Result<(), IngestError>>,
}

/// 启动事件循环任务。首次连接前的错误视为致命，之后断线自动重连。
pub fn connect(broker: &BrokerConfig, session: BusSession) -> BusConnection {
    let options = mqtt_options(broker, &session.client_prefix);
    let (client, eventloop) = AsyncClient::new(options, 10);
    let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
    let event_loop = tokio::spawn(run_event_loop(client.clone(), eventloop, session, tx));
    BusConnection {
        publisher: RumqttPublisher::new(client),
        inbound,
        event_loop,
    }
}

async fn run_event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    session: BusSession,
    tx: mpsc::Sender<InboundMessage>,
) -> Result<(), IngestError> {
    let mut connected_once = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected_once = true;
                on_connected(&client, &session);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if tx.send(message).await.is_err() {
                    return Err(IngestError::Closed);
                }
            }
            Ok(_) => {}
            Err(err) if !connected_once => return Err(IngestError::Broker(err.to_string())),
            Err(err) => {
                warn!(target: "relay.bus", error = %err, "mqtt_connection_lost");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// 事件循环任务内不能 await 客户端请求队列，使用 try_* 接口。
fn on_connected(client: &AsyncClient, session: &BusSession) {
    for topic in &session.subscriptions {
        if let Err(err) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            warn!(target: "relay.bus", topic = %topic, error = %err, "mqtt_subscribe_failed");
        }
    }
    if let Err(err) = client.try_publish(ALIVE_TOPIC, QoS::AtMostOnce, false, session.alive.to_bytes()) {
        warn!(target: "relay.bus", error = %err, "alive_publish_failed");
    }
    info!(
        target: "relay.bus",
        subscriptions = session.subscriptions.len(),
        "mqtt_connected"
    );
}
