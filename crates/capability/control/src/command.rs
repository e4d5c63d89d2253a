//! 指令载荷解析。
//!
//! 兼容几种设备/上位机常见写法：
//! - 纯文本：`21.5`、`on`
//! - JSON 标量：`21.5`、`"auto"`、`true`
//! - `value`：`{"value": 21.5, "timestamp": 1700000000000}`
//! - `setpoint`：`{"setpoint": [{"from_timestamp": .., "to_timestamp": .., "preferred_value": 21.5}], "timestamp": ..}`
//! - `schedule`：`{"schedule": [{"from_timestamp": .., "to_timestamp": .., "value": 21.5}], "timestamp": ..}`

use crate::error::ActuatorError;
use chrono::{DateTime, Utc};
use domain::{TypedValue, from_epoch_ms};
use ems_bridge::CommandKind;
use serde::Deserialize;

/// 计划中的一项：在 `[from, to)` 区间内生效的值，缺省端为开区间。
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub value: TypedValue,
}

impl PlanItem {
    pub fn open(value: TypedValue) -> Self {
        Self {
            from: None,
            to: None,
            value,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| from <= now) && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.to.is_some_and(|to| to <= now)
    }
}

/// 解析后的执行器指令。
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCommand {
    /// 立即写入。
    Value {
        value: TypedValue,
        timestamp: Option<i64>,
    },
    /// 设定值或时间表；空列表表示清除该 key 的计划。
    Plan {
        items: Vec<PlanItem>,
        timestamp: Option<i64>,
    },
}

#[derive(Debug, Deserialize)]
struct ValuePayload {
    value: TypedValue,
    #[serde(default, alias = "ts", alias = "ts_ms")]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SetpointItem {
    #[serde(default)]
    from_timestamp: Option<i64>,
    #[serde(default)]
    to_timestamp: Option<i64>,
    preferred_value: TypedValue,
}

#[derive(Debug, Deserialize)]
struct SetpointPayload {
    setpoint: Vec<SetpointItem>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ScheduleItem {
    #[serde(default)]
    from_timestamp: Option<i64>,
    #[serde(default)]
    to_timestamp: Option<i64>,
    value: TypedValue,
}

#[derive(Debug, Deserialize)]
struct SchedulePayload {
    schedule: Vec<ScheduleItem>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// 按指令类别解析载荷。
pub fn parse_command(kind: CommandKind, payload: &[u8]) -> Result<ActuatorCommand, ActuatorError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ActuatorError::Payload("payload is not utf-8".to_string()))?
        .trim();
    if text.is_empty() {
        return Err(ActuatorError::Payload("empty payload".to_string()));
    }

    if !text.starts_with('{') {
        let value = parse_scalar(text)?;
        return Ok(match kind {
            CommandKind::Value => ActuatorCommand::Value {
                value,
                timestamp: None,
            },
            CommandKind::Setpoint | CommandKind::Schedule => ActuatorCommand::Plan {
                items: vec![PlanItem::open(value)],
                timestamp: None,
            },
        });
    }

    match kind {
        CommandKind::Value => {
            let payload: ValuePayload = serde_json::from_str(text).map_err(payload_error)?;
            Ok(ActuatorCommand::Value {
                value: payload.value,
                timestamp: payload.timestamp,
            })
        }
        CommandKind::Setpoint => {
            let payload: SetpointPayload = serde_json::from_str(text).map_err(payload_error)?;
            let items = payload
                .setpoint
                .into_iter()
                .map(|item| plan_item(item.from_timestamp, item.to_timestamp, item.preferred_value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ActuatorCommand::Plan {
                items,
                timestamp: payload.timestamp,
            })
        }
        CommandKind::Schedule => {
            let payload: SchedulePayload = serde_json::from_str(text).map_err(payload_error)?;
            let items = payload
                .schedule
                .into_iter()
                .map(|item| plan_item(item.from_timestamp, item.to_timestamp, item.value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ActuatorCommand::Plan {
                items,
                timestamp: payload.timestamp,
            })
        }
    }
}

/// 纯文本或 JSON 标量。数组与 null 不是合法的指令值。
fn parse_scalar(text: &str) -> Result<TypedValue, ActuatorError> {
    if text.starts_with('[') || text == "null" {
        return Err(ActuatorError::Payload(format!("unsupported value: {}", text)));
    }
    match serde_json::from_str::<TypedValue>(text) {
        Ok(value) => Ok(value),
        Err(_) if text.starts_with('"') => Err(ActuatorError::Payload(format!(
            "unterminated string: {}",
            text
        ))),
        Err(_) => Ok(TypedValue::Text(text.to_string())),
    }
}

fn plan_item(
    from: Option<i64>,
    to: Option<i64>,
    value: TypedValue,
) -> Result<PlanItem, ActuatorError> {
    let from = from.map(parse_timestamp).transpose()?;
    let to = to.map(parse_timestamp).transpose()?;
    if let (Some(from), Some(to)) = (from, to) {
        if from >= to {
            return Err(ActuatorError::Payload(format!(
                "from_timestamp {} is not before to_timestamp {}",
                from.timestamp_millis(),
                to.timestamp_millis()
            )));
        }
    }
    Ok(PlanItem { from, to, value })
}

fn parse_timestamp(ts_ms: i64) -> Result<DateTime<Utc>, ActuatorError> {
    from_epoch_ms(ts_ms).ok_or_else(|| ActuatorError::Payload(format!("invalid timestamp: {}", ts_ms)))
}

fn payload_error(err: serde_json::Error) -> ActuatorError {
    ActuatorError::Payload(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_value() {
        assert_eq!(
            parse_command(CommandKind::Value, b" 21.5 \n").unwrap(),
            ActuatorCommand::Value {
                value: TypedValue::Number(21.5),
                timestamp: None
            }
        );
        assert_eq!(
            parse_command(CommandKind::Value, b"auto").unwrap(),
            ActuatorCommand::Value {
                value: TypedValue::Text("auto".to_string()),
                timestamp: None
            }
        );
        assert_eq!(
            parse_command(CommandKind::Value, b"\"heat\"").unwrap(),
            ActuatorCommand::Value {
                value: TypedValue::Text("heat".to_string()),
                timestamp: None
            }
        );
    }

    #[test]
    fn value_object() {
        let parsed =
            parse_command(CommandKind::Value, br#"{"value": true, "timestamp": 1700000000000}"#)
                .unwrap();
        assert_eq!(
            parsed,
            ActuatorCommand::Value {
                value: TypedValue::Bool(true),
                timestamp: Some(1_700_000_000_000)
            }
        );
    }

    #[test]
    fn setpoint_and_schedule_items() {
        let setpoint = br#"{"setpoint": [{"from_timestamp": 1000, "to_timestamp": 2000, "preferred_value": 21}], "timestamp": 900}"#;
        let ActuatorCommand::Plan { items, timestamp } =
            parse_command(CommandKind::Setpoint, setpoint).unwrap()
        else {
            panic!("expected plan");
        };
        assert_eq!(timestamp, Some(900));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value, TypedValue::Number(21.0));
        assert_eq!(items[0].from.map(|ts| ts.timestamp_millis()), Some(1000));

        let schedule = br#"{"schedule": [{"value": "eco"}, {"from_timestamp": 5000, "value": "comfort"}]}"#;
        let ActuatorCommand::Plan { items, .. } =
            parse_command(CommandKind::Schedule, schedule).unwrap()
        else {
            panic!("expected plan");
        };
        assert_eq!(items.len(), 2);
        assert!(items[0].from.is_none() && items[0].to.is_none());

        let ActuatorCommand::Plan { items, .. } =
            parse_command(CommandKind::Schedule, b"18").unwrap()
        else {
            panic!("expected plan");
        };
        assert_eq!(items, vec![PlanItem::open(TypedValue::Number(18.0))]);
    }

    #[test]
    fn rejects_bad_payloads() {
        let payloads: [&[u8]; 7] = [
            b"",
            b"   ",
            b"null",
            b"[1, 2]",
            b"\"open",
            br#"{"val": 1}"#,
            br#"{"setpoint": [{"from_timestamp": 2000, "to_timestamp": 1000, "preferred_value": 1}]}"#,
        ];
        for payload in payloads {
            let kind = if payload.starts_with(b"{\"setpoint") {
                CommandKind::Setpoint
            } else {
                CommandKind::Value
            };
            assert!(
                matches!(parse_command(kind, payload), Err(ActuatorError::Payload(_))),
                "payload {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn item_window() {
        let now = from_epoch_ms(1_500).unwrap();
        let item = plan_item(Some(1_000), Some(2_000), TypedValue::Number(1.0)).unwrap();
        assert!(item.is_active(now));
        assert!(!item.is_active(from_epoch_ms(2_000).unwrap()));
        assert!(item.is_expired(from_epoch_ms(2_000).unwrap()));
        assert!(!item.is_active(from_epoch_ms(999).unwrap()));
    }
}
