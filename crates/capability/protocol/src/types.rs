//! 传输相关类型定义

use domain::WireValue;
use serde_json::Value;
use std::time::Duration;

/// 传输层的自然读取方式，决定默认调度器。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// 需要周期性主动请求（interval 调度）
    Polled,
    /// 设备主动上报，`read_raw` 阻塞直到有数据（event 调度）
    Pushed,
}

/// 线路值转 JSON（写 TCP/HTTP/MQTT 时使用）。
pub fn wire_to_json(value: &WireValue) -> Value {
    match value {
        WireValue::Text(text) => Value::String(text.clone()),
        WireValue::Number(number) => serde_json::Number::from_f64(*number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        WireValue::Bool(flag) => Value::Bool(*flag),
        WireValue::Registers(registers) => {
            Value::Array(registers.iter().map(|word| Value::from(*word)).collect())
        }
        WireValue::Bytes(_) => Value::String(value.to_string()),
        WireValue::Bits(bits) => Value::from(*bits),
    }
}

/// 线路值转纯文本载荷（上游 MQTT 写入）。
pub fn wire_to_text(value: &WireValue) -> String {
    match value {
        WireValue::Text(text) => text.clone(),
        other => wire_to_json(other).to_string(),
    }
}

pub(crate) fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

pub(crate) fn default_connect_timeout() -> u64 {
    5000
}

pub(crate) fn default_read_timeout() -> u64 {
    3000
}
