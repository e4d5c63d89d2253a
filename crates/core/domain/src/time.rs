//! 时间换算：内部使用 UTC 时间点，线上使用毫秒时间戳。

use chrono::{DateTime, Utc};

pub fn to_epoch_ms(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_epoch_ms(ts_ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts_ms)
}

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
