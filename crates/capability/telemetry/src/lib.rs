//! 追踪初始化、周期 ID 生成与连接器计数指标。

use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsSnapshot {
    pub raw_messages: u64,
    pub parsed_values: u64,
    pub dropped_malformed: u64,
    pub dropped_unmapped: u64,
    pub discoveries: u64,
    pub published_values: u64,
    pub publish_failures: u64,
    pub backlog_dropped: u64,
    pub sensor_cycles_failed: u64,
    pub actuator_writes: u64,
    pub actuator_write_failures: u64,
    pub validation_rejected: u64,
    pub reconnects: u64,
    pub heartbeats: u64,
    pub persistence_failures: u64,
}

/// 连接器计数指标。
pub struct ConnectorMetrics {
    raw_messages: AtomicU64,
    parsed_values: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_unmapped: AtomicU64,
    discoveries: AtomicU64,
    published_values: AtomicU64,
    publish_failures: AtomicU64,
    backlog_dropped: AtomicU64,
    sensor_cycles_failed: AtomicU64,
    actuator_writes: AtomicU64,
    actuator_write_failures: AtomicU64,
    validation_rejected: AtomicU64,
    reconnects: AtomicU64,
    heartbeats: AtomicU64,
    persistence_failures: AtomicU64,
}

impl ConnectorMetrics {
    pub fn new() -> Self {
        Self {
            raw_messages: AtomicU64::new(0),
            parsed_values: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            dropped_unmapped: AtomicU64::new(0),
            discoveries: AtomicU64::new(0),
            published_values: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            backlog_dropped: AtomicU64::new(0),
            sensor_cycles_failed: AtomicU64::new(0),
            actuator_writes: AtomicU64::new(0),
            actuator_write_failures: AtomicU64::new(0),
            validation_rejected: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            raw_messages: self.raw_messages.load(Ordering::Relaxed),
            parsed_values: self.parsed_values.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unmapped: self.dropped_unmapped.load(Ordering::Relaxed),
            discoveries: self.discoveries.load(Ordering::Relaxed),
            published_values: self.published_values.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            backlog_dropped: self.backlog_dropped.load(Ordering::Relaxed),
            sensor_cycles_failed: self.sensor_cycles_failed.load(Ordering::Relaxed),
            actuator_writes: self.actuator_writes.load(Ordering::Relaxed),
            actuator_write_failures: self.actuator_write_failures.load(Ordering::Relaxed),
            validation_rejected: self.validation_rejected.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<ConnectorMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static ConnectorMetrics {
    METRICS.get_or_init(ConnectorMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成一次处理周期的标识，用于关联同一轮 RECEIVE..PUBLISH 的日志。
pub fn new_cycle_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录原始报文接收次数。
pub fn record_raw_message() {
    metrics().raw_messages.fetch_add(1, Ordering::Relaxed);
}

/// 记录解析出的值数量。
pub fn record_parsed_values(count: u64) {
    metrics().parsed_values.fetch_add(count, Ordering::Relaxed);
}

/// 记录畸形值丢弃次数。
pub fn record_dropped_malformed() {
    metrics().dropped_malformed.fetch_add(1, Ordering::Relaxed);
}

/// 记录未映射 key 次数。
pub fn record_dropped_unmapped() {
    metrics().dropped_unmapped.fetch_add(1, Ordering::Relaxed);
}

/// 记录新发现的数据点数量。
pub fn record_discoveries(count: u64) {
    metrics().discoveries.fetch_add(count, Ordering::Relaxed);
}

/// 记录值发布次数。
pub fn record_published_value() {
    metrics().published_values.fetch_add(1, Ordering::Relaxed);
}

/// 记录发布失败次数。
pub fn record_publish_failure() {
    metrics().publish_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录断线期间积压队列溢出丢弃次数。
pub fn record_backlog_dropped() {
    metrics().backlog_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录失败的传感器周期。
pub fn record_sensor_cycle_failed() {
    metrics().sensor_cycles_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录执行器写入成功次数。
pub fn record_actuator_write() {
    metrics().actuator_writes.fetch_add(1, Ordering::Relaxed);
}

/// 记录执行器写入失败次数。
pub fn record_actuator_write_failure() {
    metrics()
        .actuator_write_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录校验拒绝次数。
pub fn record_validation_rejected() {
    metrics().validation_rejected.fetch_add(1, Ordering::Relaxed);
}

/// 记录 Broker 重连次数。
pub fn record_reconnect() {
    metrics().reconnects.fetch_add(1, Ordering::Relaxed);
}

/// 记录心跳次数。
pub fn record_heartbeat() {
    metrics().heartbeats.fetch_add(1, Ordering::Relaxed);
}

/// 记录持久化失败次数（不阻断主流程）。
pub fn record_persistence_failure() {
    metrics()
        .persistence_failures
        .fetch_add(1, Ordering::Relaxed);
}
