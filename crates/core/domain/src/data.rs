use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 数据点方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// 设备只读输出。
    Sensor,
    /// 接受指令的设备输入。
    Actuator,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sensor => "sensor",
            Direction::Actuator => "actuator",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 数据格式。
///
/// 决定 `example_value`、`unit`、`min/max` 与 `allowed_values` 的含义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    GenericText,
    GenericNumeric,
    DiscreteText,
    DiscreteNumeric,
    ContinuousNumeric,
}

impl DataFormat {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataFormat::GenericNumeric | DataFormat::DiscreteNumeric | DataFormat::ContinuousNumeric
        )
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, DataFormat::DiscreteText | DataFormat::DiscreteNumeric)
    }
}

/// 规范类型值（总线上的 JSON 标量）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl TypedValue {
    /// 数值视图；文本会尝试按浮点数解析。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Number(v) => Some(*v),
            TypedValue::Text(v) => v.trim().parse::<f64>().ok(),
            TypedValue::Bool(_) => None,
        }
    }

    /// 布尔视图；数值 0/1 与常见文本均可识别。
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(v) => Some(*v),
            TypedValue::Number(v) if *v == 0.0 => Some(false),
            TypedValue::Number(v) if *v == 1.0 => Some(true),
            TypedValue::Number(_) => None,
            TypedValue::Text(v) => parse_bool_text(v),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Bool(v) => write!(f, "{}", v),
            TypedValue::Number(v) => write!(f, "{}", v),
            TypedValue::Text(v) => f.write_str(v),
        }
    }
}

/// 解析常见的布尔文本（true/false、on/off、1/0）。
pub fn parse_bool_text(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Some(true),
        "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// 线路值：传输层原生的取值形式。
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Text(String),
    Number(f64),
    Bool(bool),
    /// 寄存器序列（Modbus）。
    Registers(Vec<u16>),
    /// 原始字节。
    Bytes(Vec<u8>),
    /// 由链路层打包的不足一个字节的值（最多 6 位）。
    Bits(u8),
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::Text(v) => f.write_str(v),
            WireValue::Number(v) => write!(f, "{}", v),
            WireValue::Bool(v) => write!(f, "{}", v),
            WireValue::Registers(v) => write!(f, "{:?}", v),
            WireValue::Bytes(v) => {
                for byte in v {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            WireValue::Bits(v) => write!(f, "{}", v),
        }
    }
}

/// 数据点元数据。
///
/// `key` 与连接器身份共同确定一条数据点记录；框架本身从不删除见过的 key。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointMeta {
    pub key: String,
    pub direction: Direction,
    pub data_format: DataFormat,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub allowed_values: Option<Vec<TypedValue>>,
    /// 仅用于发现/登记，从不参与控制决策。
    #[serde(default)]
    pub example_value: Option<String>,
}

/// 原始报文载荷。
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Text(String),
    Bytes(Vec<u8>),
    /// 传输层已按地址拆分好的字段。
    Fields(Vec<(String, WireValue)>),
}

/// 传输层产生的原始报文，归创建它的采集周期独占。
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub payload: RawPayload,
    pub timestamp: DateTime<Utc>,
}

impl RawMessage {
    /// 以当前时间构造。
    pub fn new(payload: RawPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn at(payload: RawPayload, timestamp: DateTime<Utc>) -> Self {
        Self { payload, timestamp }
    }
}

/// 解析后的报文，发布后即丢弃。
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    /// 已映射且解码成功的值。
    pub parsed_values: BTreeMap<String, TypedValue>,
    /// 所有格式正确的 key 的原始示例值（含未映射 key）。
    pub examples: BTreeMap<String, String>,
    /// 编解码器未登记的 key。
    pub unmapped: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ParsedMessage {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            parsed_values: BTreeMap::new(),
            examples: BTreeMap::new(),
            unmapped: Vec::new(),
            timestamp,
        }
    }
}

/// 进程级存活信号。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub last_heartbeat: DateTime<Utc>,
    pub next_heartbeat: DateTime<Utc>,
}

impl Heartbeat {
    /// 计算下一次心跳：`last = now`，`next = now + period`。
    ///
    /// 时钟回拨时 `last` 仍严格大于上一次的 `last`。
    pub fn tick(
        previous: Option<&Heartbeat>,
        now: DateTime<Utc>,
        period: std::time::Duration,
    ) -> Self {
        let last = match previous {
            Some(previous) if now <= previous.last_heartbeat => {
                previous.last_heartbeat + chrono::Duration::milliseconds(1)
            }
            _ => now,
        };
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX / 2);
        Self {
            last_heartbeat: last,
            next_heartbeat: last + chrono::Duration::milliseconds(period_ms),
        }
    }
}
