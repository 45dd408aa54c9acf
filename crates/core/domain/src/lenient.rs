//! 宽松的数值字段反序列化：配置文件中的数字可能以字符串出现。

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Display;
use std::str::FromStr;

pub fn option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => parse_number(&n).map(Some).map_err(de::Error::custom),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<T>().map(Some).map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!("expected number, got {other}"))),
    }
}

/// 整数字段遇到 `1.0` 时按整数解析。
fn parse_number<T>(n: &serde_json::Number) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    let text = n.to_string();
    match text.parse::<T>() {
        Ok(value) => Ok(value),
        Err(err) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64)
                .parse::<T>()
                .map_err(|e| e.to_string()),
            _ => Err(err.to_string()),
        },
    }
}

/// 布尔开关：`true` / `"True"` / `1` 均视为真。
pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(v)) => v,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    })
}
