//! 总线直通设备（`MQTT`）：设备本身挂在 MQTT 上，网关只做转发。
//!
//! - 数据读 Topic 上的载荷：每个键即一个通道更新，不做缩放
//! - 请求 Topic 读：固定应答，首个通道值为 1
//! - 请求 Topic 写：去掉 `Read/Write` 键后转发到设备写 Topic

use crate::error::ProtocolError;
use bus_contract::{BusPublisher, RequestPayload};
use chrono::NaiveDateTime;
use domain::{Reading, ReadingValue, ResultEnvelope};
use relay_normalize::ChannelRow;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct BusPassthrough {
    equipment: String,
    data_read_topic: Option<String>,
    data_write_topic: Option<String>,
    publisher: Arc<dyn BusPublisher>,
}

impl BusPassthrough {
    pub fn new(
        equipment: impl Into<String>,
        data_read_topic: Option<String>,
        data_write_topic: Option<String>,
        publisher: Arc<dyn BusPublisher>,
    ) -> Self {
        Self {
            equipment: equipment.into(),
            data_read_topic,
            data_write_topic,
            publisher,
        }
    }

    pub fn data_read_topic(&self) -> Option<&str> {
        self.data_read_topic.as_deref()
    }

    pub fn is_data_topic(&self, topic: &str) -> bool {
        self.data_read_topic.as_deref() == Some(topic)
    }

    /// 设备主动上报：对象的每个键转为一条读数。
    pub fn ingest_data(
        &self,
        payload: &[u8],
        time: NaiveDateTime,
    ) -> Result<ResultEnvelope, ProtocolError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| ProtocolError::DataParse(e.to_string()))?;
        let Value::Object(entries) = value else {
            return Err(ProtocolError::DataParse("data payload is not an object".to_string()));
        };
        let mut envelope = ResultEnvelope::new(&self.equipment);
        for (tagnum, value) in entries {
            envelope.insert(tagnum, Reading::new(ReadingValue::from(value), time));
        }
        Ok(envelope)
    }

    /// 读请求应答：首个通道写入固定值 1。
    pub fn acknowledge(&self, rows: &[ChannelRow], time: NaiveDateTime) -> ResultEnvelope {
        let mut envelope = ResultEnvelope::new(&self.equipment);
        if let Some(first) = rows.first() {
            envelope.insert(first.tagnum.clone(), Reading::new(ReadingValue::Integer(1), time));
        }
        envelope
    }

    /// 写请求转发，返回转发出去的通道。
    pub async fn forward(
        &self,
        request: &RequestPayload,
        time: NaiveDateTime,
    ) -> Result<ResultEnvelope, ProtocolError> {
        let topic = self
            .data_write_topic
            .as_deref()
            .ok_or_else(|| ProtocolError::ConfigParse("DataWriteTopic is not configured".to_string()))?;
        let values = request.forwarded_values();
        let payload = serde_json::to_vec(&values).map_err(|e| ProtocolError::DataParse(e.to_string()))?;
        self.publisher
            .publish(topic, payload)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        debug!(target: "relay.protocol", topic = %topic, channels = values.len(), "bus_forwarded");

        let mut envelope = ResultEnvelope::new(&self.equipment);
        for (tagnum, value) in values {
            envelope.insert(tagnum, Reading::new(ReadingValue::from(value), time));
        }
        Ok(envelope)
    }
}
