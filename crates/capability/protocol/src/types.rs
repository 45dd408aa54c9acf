//! 通道结果与聚合。

use crate::error::ChannelFault;
use chrono::NaiveDateTime;
use domain::{Reading, ReadingValue, ResultEnvelope};

/// 单通道结果。
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    pub tagnum: String,
    pub result: Result<ReadingValue, ChannelFault>,
}

impl ChannelOutcome {
    pub fn ok(tagnum: impl Into<String>, value: ReadingValue) -> Self {
        Self {
            tagnum: tagnum.into(),
            result: Ok(value),
        }
    }

    pub fn fault(tagnum: impl Into<String>, fault: impl Into<ChannelFault>) -> Self {
        Self {
            tagnum: tagnum.into(),
            result: Err(fault.into()),
        }
    }
}

/// 聚合结果：成功通道进入信封，失败通道单独列出。
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub envelope: ResultEnvelope,
    pub faults: Vec<(String, ChannelFault)>,
}

/// 以请求级采集时刻聚合通道结果。失败通道不出现在信封中。
pub fn collect(equipment: &str, time: NaiveDateTime, outcomes: Vec<ChannelOutcome>) -> Collected {
    let mut envelope = ResultEnvelope::new(equipment);
    let mut faults = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(value) => envelope.insert(outcome.tagnum, Reading::new(value, time)),
            Err(fault) => faults.push((outcome.tagnum, fault)),
        }
    }
    Collected { envelope, faults }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::parse_time;

    #[test]
    fn collect_omits_failed_channels() {
        let time = parse_time("2024-05-01 10:00:00").expect("time");
        let collected = collect(
            "PLC",
            time,
            vec![
                ChannelOutcome::ok("A", ReadingValue::Number(1.0)),
                ChannelOutcome::fault("B", ChannelFault::Transport("timeout".into())),
                ChannelOutcome::ok("C", ReadingValue::Integer(3)),
            ],
        );
        assert_eq!(collected.envelope.len(), 2);
        assert!(collected.envelope.get("B").is_none());
        assert_eq!(collected.faults.len(), 1);
        assert_eq!(collected.faults[0].0, "B");
        assert!(collected.envelope.readings.values().all(|r| r.time == time));
    }
}
