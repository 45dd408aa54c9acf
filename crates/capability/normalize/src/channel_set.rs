//! 通道集：请求通道 → 有序工作集。

use bus_contract::ChannelMap;
use domain::{ChannelDescriptor, ChannelKind, EquipmentConfig, ReadingValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelSetError {
    #[error("unknown channels: {}", .0.join(", "))]
    UnknownTags(Vec<String>),
    #[error("empty channel set")]
    Empty,
}

/// 工作集中的一行：通道描述 + 请求值（读请求为 `Null`）。
#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub tagnum: String,
    pub descriptor: ChannelDescriptor,
    pub requested: ReadingValue,
}

/// 按请求顺序解析通道；存在未知 Tagnum 时整个请求被拒绝。
pub fn resolve(
    channels: &ChannelMap,
    config: &EquipmentConfig,
) -> Result<Vec<ChannelRow>, ChannelSetError> {
    if channels.is_empty() {
        return Err(ChannelSetError::Empty);
    }
    let mut rows = Vec::with_capacity(channels.len());
    let mut unknown = Vec::new();
    for (tagnum, value) in channels.iter() {
        match config.channel(tagnum) {
            Some(descriptor) => rows.push(ChannelRow {
                tagnum: tagnum.to_string(),
                descriptor: descriptor.clone(),
                requested: ReadingValue::from(value.clone()),
            }),
            None => unknown.push(tagnum.to_string()),
        }
    }
    if !unknown.is_empty() {
        return Err(ChannelSetError::UnknownTags(unknown));
    }
    Ok(rows)
}

/// 同一寄存器类的通道组及其连续地址跨度 `[start, end]`。
#[derive(Debug, Clone)]
pub struct ChannelGroup {
    pub kind: ChannelKind,
    pub start: u16,
    pub end: u16,
    pub rows: Vec<ChannelRow>,
}

impl ChannelGroup {
    /// 跨度内的地址个数，`0..=65535` 时为 65536。
    pub fn count(&self) -> u32 {
        u32::from(self.end - self.start) + 1
    }

    /// 地址在批量读结果中的下标。
    pub fn index_of(&self, address: u16) -> Option<usize> {
        (self.start..=self.end)
            .contains(&address)
            .then(|| usize::from(address - self.start))
    }
}

pub fn group_by_kind(rows: Vec<ChannelRow>) -> Vec<ChannelGroup> {
    let mut groups: BTreeMap<ChannelKind, Vec<ChannelRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.descriptor.kind.clone()).or_default().push(row);
    }
    groups
        .into_iter()
        .map(|(kind, rows)| {
            let addresses = rows.iter().filter_map(|row| row.descriptor.address());
            let start = addresses.clone().min().unwrap_or(0);
            let end = addresses.max().unwrap_or(start);
            ChannelGroup {
                kind,
                start,
                end,
                rows,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{EquipmentConfig, IoPoint};
    use serde_json::json;

    fn config() -> EquipmentConfig {
        serde_json::from_value(json!({
            "EquipmentTags": { "EquipmentName": "PLC", "Communication": "ModbusTcp",
                               "Connection": { "IP": "127.0.0.1", "Unit": 1 } },
            "Channels": {
                "A": { "Type": "HRegister", "IOPoint": 15, "DataType": "int16", "Scalar": 1, "Offset": 0, "Decimal": 0 },
                "B": { "Type": "HRegister", "IOPoint": 10, "DataType": "int16", "Scalar": 1, "Offset": 0, "Decimal": 0 },
                "C": { "Type": "HRegister", "IOPoint": 12, "DataType": "int16", "Scalar": 1, "Offset": 0, "Decimal": 0 },
                "D": { "Type": "Coils", "IOPoint": 3, "DataType": "bool" }
            }
        }))
        .expect("config")
    }

    #[test]
    fn resolve_preserves_request_order() {
        let channels: ChannelMap = [("C", json!(null)), ("A", json!(null)), ("D", json!(1))]
            .into_iter()
            .collect();
        let rows = resolve(&channels, &config()).expect("rows");
        let tags: Vec<&str> = rows.iter().map(|r| r.tagnum.as_str()).collect();
        assert_eq!(tags, vec!["C", "A", "D"]);
        assert_eq!(rows[2].requested, ReadingValue::Integer(1));
        assert_eq!(rows[0].descriptor.io_point, Some(IoPoint::Address(12)));
    }

    #[test]
    fn unknown_tags_reject_request() {
        let channels: ChannelMap = [("A", json!(null)), ("Z", json!(null))].into_iter().collect();
        let err = resolve(&channels, &config()).expect_err("unknown");
        assert_eq!(err, ChannelSetError::UnknownTags(vec!["Z".to_string()]));
    }

    #[test]
    fn group_spans_min_to_max_address() {
        let channels: ChannelMap = [("A", json!(null)), ("B", json!(null)), ("C", json!(null)), ("D", json!(null))]
            .into_iter()
            .collect();
        let groups = group_by_kind(resolve(&channels, &config()).expect("rows"));
        assert_eq!(groups.len(), 2);
        let registers = groups
            .iter()
            .find(|g| g.kind == ChannelKind::HoldingRegister)
            .expect("group");
        assert_eq!((registers.start, registers.end, registers.count()), (10, 15, 6));
        assert_eq!(registers.index_of(12), Some(2));
        assert_eq!(registers.index_of(16), None);
    }

    #[test]
    fn full_address_span_counts_without_overflow() {
        let group = ChannelGroup {
            kind: ChannelKind::HoldingRegister,
            start: 0,
            end: u16::MAX,
            rows: Vec::new(),
        };
        assert_eq!(group.count(), 65_536);
        assert_eq!(group.index_of(u16::MAX), Some(65_535));
    }
}
