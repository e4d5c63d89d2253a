//! 总线报文载荷（JSON）。

use crate::data::{Heartbeat, TypedValue};
use crate::time::to_epoch_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `<key>/value` 报文。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMessage {
    pub value: TypedValue,
    pub timestamp: i64,
}

/// `heartbeat` 报文。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub this_heartbeats_timestamp: i64,
    pub next_heartbeats_timestamp: i64,
}

impl From<&Heartbeat> for HeartbeatMessage {
    fn from(heartbeat: &Heartbeat) -> Self {
        Self {
            this_heartbeats_timestamp: to_epoch_ms(&heartbeat.last_heartbeat),
            next_heartbeats_timestamp: to_epoch_ms(&heartbeat.next_heartbeat),
        }
    }
}

/// `available_datapoints` 报文：方向 -> key -> 示例值。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableDatapoints {
    #[serde(default)]
    pub sensor: BTreeMap<String, String>,
    #[serde(default)]
    pub actuator: BTreeMap<String, String>,
}

/// `datapoint_map` 报文。
///
/// - sensor：key -> 发布 topic
/// - actuator：指令 topic 前缀 -> key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatapointMap {
    #[serde(default)]
    pub sensor: BTreeMap<String, String>,
    #[serde(default)]
    pub actuator: BTreeMap<String, String>,
}

/// 日志级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(text)
    }
}

/// `logs` 报文。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub msg: String,
    pub emitter: String,
    pub level: LogLevel,
}

/// 指令被拒绝时发布到 `<指令 topic>/error` 的报文。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandErrorMessage {
    pub error: String,
    pub timestamp: i64,
}
