//! 入库前的值清洗。

use domain::{BatchRow, BatchValue, ReadingValue, ResultEnvelope};
use regex::Regex;
use std::sync::LazyLock;

/// 形如 `2024-05-01T10:11:12` 开头的文本（部分网关把时间戳当作值上报）
static ISO_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").ok());

/// 单值清洗：
/// - `"NULL"` 哨兵文本、ISO-8601 时间戳文本 → NaN
/// - `false` / `"OFF"` / `"false"` → 0，`true` / `"ON"` / `"true"` → 1
/// - JSON `null`、`""` / `" "` → 空（SQL NULL）
pub fn sanitize(value: &ReadingValue) -> BatchValue {
    match value {
        ReadingValue::Null => BatchValue::Null,
        ReadingValue::Bool(v) => BatchValue::Number(if *v { 1.0 } else { 0.0 }),
        ReadingValue::Integer(v) => BatchValue::Number(*v as f64),
        ReadingValue::Number(v) => BatchValue::Number(*v),
        ReadingValue::Text(text) => match text.as_str() {
            "NULL" => BatchValue::Number(f64::NAN),
            "OFF" | "false" => BatchValue::Number(0.0),
            "ON" | "true" => BatchValue::Number(1.0),
            "" | " " => BatchValue::Null,
            other if is_iso_timestamp(other) => BatchValue::Number(f64::NAN),
            other => BatchValue::Text(other.to_string()),
        },
    }
}

fn is_iso_timestamp(text: &str) -> bool {
    ISO_PREFIX.as_ref().is_some_and(|re| re.is_match(text))
}

/// 结果信封展开为批量行，时间取各读数自身的采集时刻。
pub fn flatten(envelope: &ResultEnvelope) -> Vec<BatchRow> {
    envelope
        .readings
        .iter()
        .map(|(tagnum, reading)| BatchRow {
            time: reading.time,
            equipment: envelope.equipment.clone(),
            tagnum: tagnum.clone(),
            value: sanitize(&reading.value),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_and_switch_words() {
        assert!(sanitize(&ReadingValue::Text("NULL".into())).is_nan());
        assert_eq!(sanitize(&ReadingValue::Null), BatchValue::Null);
        assert_eq!(sanitize(&ReadingValue::Bool(true)), BatchValue::Number(1.0));
        assert_eq!(sanitize(&ReadingValue::Text("OFF".into())), BatchValue::Number(0.0));
        assert_eq!(sanitize(&ReadingValue::Text("true".into())), BatchValue::Number(1.0));
        assert_eq!(sanitize(&ReadingValue::Text(" ".into())), BatchValue::Null);
        assert_eq!(sanitize(&ReadingValue::Text("".into())), BatchValue::Null);
    }

    #[test]
    fn iso_timestamps_become_nan() {
        assert!(sanitize(&ReadingValue::Text("2024-05-01T10:11:12.000Z".into())).is_nan());
        assert_eq!(
            sanitize(&ReadingValue::Text("2024-05-01 10:11:12".into())),
            BatchValue::Text("2024-05-01 10:11:12".into())
        );
    }

    #[test]
    fn numbers_pass_through() {
        assert_eq!(sanitize(&ReadingValue::Integer(7)), BatchValue::Number(7.0));
        assert_eq!(sanitize(&ReadingValue::Number(2.5)), BatchValue::Number(2.5));
    }
}
