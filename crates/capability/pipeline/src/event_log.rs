use domain::{DatapointMeta, Direction, Heartbeat, LogEntry, LogLevel, now_epoch_ms};
use ems_bridge::{DeliveryClass, OutboundMessage, Publisher, Topics};
use ems_storage::RecordStore;
use ems_telemetry::record_persistence_failure;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 运维事件日志：tracing + `{root}/logs` + 持久化协作者。
///
/// 持久化失败只告警计数，不重试也不中断链路。
#[derive(Clone)]
pub struct EventLog {
    emitter: String,
    topic: String,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn RecordStore>,
}

impl EventLog {
    pub fn new(
        emitter: impl Into<String>,
        topics: &Topics,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            emitter: emitter.into(),
            topic: topics.logs(),
            publisher,
            store,
        }
    }

    pub async fn info(&self, msg: impl Into<String>) {
        self.log(LogLevel::Info, msg.into()).await;
    }

    pub async fn warning(&self, msg: impl Into<String>) {
        self.log(LogLevel::Warning, msg.into()).await;
    }

    pub async fn error(&self, msg: impl Into<String>) {
        self.log(LogLevel::Error, msg.into()).await;
    }

    pub async fn log(&self, level: LogLevel, msg: String) {
        match level {
            LogLevel::Debug => debug!(target: "ems.connector", emitter = %self.emitter, "{}", msg),
            LogLevel::Info => info!(target: "ems.connector", emitter = %self.emitter, "{}", msg),
            LogLevel::Warning => warn!(target: "ems.connector", emitter = %self.emitter, "{}", msg),
            LogLevel::Error => error!(target: "ems.connector", emitter = %self.emitter, "{}", msg),
        }

        let entry = LogEntry {
            timestamp: now_epoch_ms(),
            msg,
            emitter: self.emitter.clone(),
            level,
        };
        let published = OutboundMessage::json(self.topic.clone(), &entry, false, DeliveryClass::Control)
            .and_then(|message| self.publisher.publish(message));
        if let Err(err) = published {
            debug!(target: "ems.connector", error = %err, "log_publish_failed");
        }
        if let Err(err) = self.store.record_log(&entry).await {
            record_persistence_failure();
            warn!(target: "ems.connector", error = %err, "log_persist_failed");
        }
    }

    pub async fn heartbeat(&self, heartbeat: &Heartbeat) {
        if let Err(err) = self.store.record_heartbeat(heartbeat).await {
            record_persistence_failure();
            warn!(target: "ems.connector", error = %err, "heartbeat_persist_failed");
        }
    }

    /// 启动时记录配置的数据点。
    pub async fn datapoints_loaded(&self, datapoints: &[&DatapointMeta]) {
        let sensors = datapoints
            .iter()
            .filter(|meta| meta.direction == Direction::Sensor)
            .count();
        self.info(format!(
            "loaded {} datapoints ({} sensor, {} actuator)",
            datapoints.len(),
            sensors,
            datapoints.len() - sensors
        ))
        .await;
    }
}
