//! Relay 总线契约：Topic 命名、请求载荷、诊断载荷与发布者抽象。

use async_trait::async_trait;
use domain::ResultEnvelope;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;

/// 心跳 Topic（所有进程共用）。
pub const ALIVE_TOPIC: &str = "Relay/Alive/";
/// 入库进程订阅的结果通配 Topic。
pub const DATA_WILDCARD: &str = "Relay/Data/#";
/// 请求载荷中的读写判别键。
pub const DIRECTION_KEY: &str = "Read/Write";
pub const CHANNELS_KEY: &str = "Channels";
/// 毒丸到达时发布的 ServerIssue 文本。
pub const SHUTDOWN_NOTICE: &str = "Poison pill arrived - server shutting down";

/// 单个进程的 Topic 集合。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub request: String,
    pub data: String,
    pub poison_pill: String,
    pub server_issue: String,
    pub comm_issue: String,
}

impl Topics {
    pub fn for_name(name: &str) -> Self {
        Self {
            request: format!("Relay/Request/{name}"),
            data: format!("Relay/Data/{name}"),
            poison_pill: format!("Relay/PoisonPill/{name}"),
            server_issue: format!("Relay/ServerIssue/{name}"),
            comm_issue: format!("Relay/CommIssue/{name}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("unknown direction: {0}")]
    UnknownDirection(String),
    #[error("missing field: {0}")]
    MissingField(String),
}

/// 总线发布失败。
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("publish error: {0}")]
    Publish(String),
    #[error("subscribe error: {0}")]
    Subscribe(String),
    #[error("connection error: {0}")]
    Connection(String),
}

/// 请求方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "R",
            Self::Write => "W",
        }
    }
}

impl FromStr for Direction {
    type Err = ContractError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "R" => Ok(Self::Read),
            "W" => Ok(Self::Write),
            other => Err(ContractError::UnknownDirection(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求通道表，保持载荷中的键顺序。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMap(Vec<(String, Value)>);

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重复键以后出现的值为准，位置保持首次出现处。
    pub fn insert(&mut self, tagnum: impl Into<String>, value: Value) {
        let tagnum = tagnum.into();
        match self.0.iter_mut().find(|(key, _)| *key == tagnum) {
            Some(entry) => entry.1 = value,
            None => self.0.push((tagnum, value)),
        }
    }

    pub fn get(&self, tagnum: &str) -> Option<&Value> {
        self.0.iter().find(|(key, _)| key == tagnum).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for ChannelMap {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (tagnum, value) in iter {
            map.insert(tagnum, value);
        }
        map
    }
}

impl Serialize for ChannelMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChannelMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChannelMapVisitor;

        impl<'de> Visitor<'de> for ChannelMapVisitor {
            type Value = ChannelMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of tagnum to value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = ChannelMap::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(ChannelMap::new())
            }
        }

        deserializer.deserialize_any(ChannelMapVisitor)
    }
}

/// 请求载荷：`{"Read/Write": "R"|"W", "Channels": {tag: value|null}}`。
///
/// 其余顶层键保留在 `extra` 中，总线直通写入时一并转发。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    #[serde(rename = "Read/Write", default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(rename = "Channels", default)]
    pub channels: ChannelMap,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestPayload {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ContractError> {
        serde_json::from_slice(bytes).map_err(|err| ContractError::InvalidPayload(err.to_string()))
    }

    pub fn read<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            direction: Some(Direction::Read.as_str().to_string()),
            channels: tags.into_iter().map(|t| (t.into(), Value::Null)).collect(),
            extra: Map::new(),
        }
    }

    pub fn write<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self {
            direction: Some(Direction::Write.as_str().to_string()),
            channels: values.into_iter().map(|(t, v)| (t.into(), v)).collect(),
            extra: Map::new(),
        }
    }

    /// 解析读写判别键；缺失或取值非法均视为请求错误。
    pub fn direction(&self) -> Result<Direction, ContractError> {
        self.direction
            .as_deref()
            .ok_or_else(|| ContractError::MissingField(DIRECTION_KEY.to_string()))?
            .parse()
    }

    /// 合并 `Read/Write` 之外所有对象型顶层值，作为转发载荷。
    pub fn forwarded_values(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for (tag, value) in self.channels.iter() {
            merged.insert(tag.to_string(), value.clone());
        }
        for value in self.extra.values() {
            if let Value::Object(entries) = value {
                for (tag, value) in entries {
                    merged.insert(tag.clone(), value.clone());
                }
            }
        }
        merged
    }
}

/// 心跳载荷：`{"success?":"totally","Instrument":<name>}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlivePayload {
    #[serde(rename = "success?")]
    pub success: String,
    #[serde(rename = "Instrument", default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(rename = "Database", default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl AlivePayload {
    pub fn instrument(name: impl Into<String>) -> Self {
        Self {
            success: "totally".to_string(),
            instrument: Some(name.into()),
            database: None,
        }
    }

    pub fn database(name: impl Into<String>) -> Self {
        Self {
            success: "totally".to_string(),
            instrument: None,
            database: Some(name.into()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// 诊断载荷：JSON 字符串。
pub fn issue_payload(message: &str) -> Vec<u8> {
    serde_json::to_vec(message).unwrap_or_else(|_| message.as_bytes().to_vec())
}

pub fn envelope_payload(envelope: &ResultEnvelope) -> Result<Vec<u8>, ContractError> {
    serde_json::to_vec(envelope).map_err(|err| ContractError::InvalidPayload(err.to_string()))
}

pub fn parse_envelope(bytes: &[u8]) -> Result<ResultEnvelope, ContractError> {
    serde_json::from_slice(bytes).map_err(|err| ContractError::InvalidPayload(err.to_string()))
}

/// 总线发布能力。
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// 已发布消息。
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// 内存发布者，记录所有发布的消息。
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn on_topic(&self, topic: &str) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BusPublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}
