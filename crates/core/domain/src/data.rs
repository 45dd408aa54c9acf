//! 读数与结果信封。

use chrono::{Local, NaiveDateTime, Timelike};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 总线载荷中的时间格式。
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 请求级采集时刻（本地时间，截断到秒）。
pub fn capture_time() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn format_time(time: &NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// 解析总线时间，兼容 `T` 分隔符。
pub fn parse_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// 通道值。
///
/// `Null` 是编解码失败时的哨兵值，序列化为字符串 `"NULL"`；
/// 反序列化时 JSON `null` 映射为 `Null`，字符串 `"NULL"` 保持为文本，
/// 由批量写入器统一清洗。
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingValue {
    Integer(i64),
    Number(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl ReadingValue {
    /// 数值视图；布尔按 0/1，文本尝试解析。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Number(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Text(v) => v.trim().parse::<f64>().ok(),
            Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<serde_json::Value> for ReadingValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(v) => Self::Bool(v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => Self::Integer(v),
                None => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(v) => Self::Text(v),
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<&ReadingValue> for serde_json::Value {
    fn from(value: &ReadingValue) -> Self {
        match value {
            ReadingValue::Integer(v) => serde_json::Value::from(*v),
            ReadingValue::Number(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String("NULL".to_string())),
            ReadingValue::Bool(v) => serde_json::Value::Bool(*v),
            ReadingValue::Text(v) => serde_json::Value::String(v.clone()),
            ReadingValue::Null => serde_json::Value::String("NULL".to_string()),
        }
    }
}

impl Serialize for ReadingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_json::Value::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReadingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

/// 单通道读数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "Value")]
    pub value: ReadingValue,
    #[serde(rename = "Time", with = "time_text")]
    pub time: NaiveDateTime,
}

impl Reading {
    pub fn new(value: ReadingValue, time: NaiveDateTime) -> Self {
        Self { value, time }
    }
}

mod time_text {
    use super::{format_time, parse_time};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(time: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_time(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_time(&text).ok_or_else(|| de::Error::custom(format!("invalid time: {text}")))
    }
}

/// 结果信封：`{ EquipmentName: { Tagnum: Reading } }`。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultEnvelope {
    pub equipment: String,
    pub readings: BTreeMap<String, Reading>,
}

impl ResultEnvelope {
    pub fn new(equipment: impl Into<String>) -> Self {
        Self {
            equipment: equipment.into(),
            readings: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, tagnum: impl Into<String>, reading: Reading) {
        self.readings.insert(tagnum.into(), reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn get(&self, tagnum: &str) -> Option<&Reading> {
        self.readings.get(tagnum)
    }
}

impl Serialize for ResultEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.equipment, &self.readings)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResultEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EnvelopeVisitor;

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = ResultEnvelope;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-key map of equipment name to readings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let Some((equipment, readings)) =
                    access.next_entry::<String, BTreeMap<String, Reading>>()?
                else {
                    return Err(de::Error::custom("empty result envelope"));
                };
                // 只取第一个设备键，其余忽略
                while access
                    .next_entry::<de::IgnoredAny, de::IgnoredAny>()?
                    .is_some()
                {}
                Ok(ResultEnvelope {
                    equipment,
                    readings,
                })
            }
        }

        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

/// 入库值（清洗后）。
#[derive(Debug, Clone, PartialEq)]
pub enum BatchValue {
    /// 数值，允许 NaN
    Number(f64),
    Text(String),
    Null,
}

impl BatchValue {
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Number(v) if v.is_nan())
    }
}

/// 批量行：`{time, equipment, tagnum, value}`。
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub time: NaiveDateTime,
    pub equipment: String,
    pub tagnum: String,
    pub value: BatchValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinel_serializes_as_text() {
        let value = serde_json::to_value(ReadingValue::Null).unwrap();
        assert_eq!(value, serde_json::json!("NULL"));
    }

    #[test]
    fn nan_number_serializes_as_sentinel() {
        let value = serde_json::to_value(ReadingValue::Number(f64::NAN)).unwrap();
        assert_eq!(value, serde_json::json!("NULL"));
    }

    #[test]
    fn parse_time_accepts_t_separator() {
        let a = parse_time("2024-05-01 10:11:12").unwrap();
        let b = parse_time("2024-05-01T10:11:12").unwrap();
        assert_eq!(a, b);
        assert!(parse_time("yesterday").is_none());
    }
}
