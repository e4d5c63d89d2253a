use crate::error::SensorFlowError;
use crate::event_log::EventLog;
use crate::parse::parse_raw;
use crate::registry::AvailableDatapointsRegistry;
use crate::routing::Routing;
use domain::{Direction, RawMessage, ValueMessage, to_epoch_ms};
use ems_bridge::{DeliveryClass, OutboundMessage, Publisher, Topics};
use ems_codec::Codec;
use ems_protocol::Transport;
use ems_telemetry::{
    new_cycle_id, record_discoveries, record_dropped_malformed, record_dropped_unmapped,
    record_parsed_values, record_publish_failure, record_published_value, record_raw_message,
    record_sensor_cycle_failed,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, debug, info_span, warn};

/// 一次传感器周期的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub published: usize,
    pub malformed: usize,
    pub discovered: usize,
    pub unmapped: usize,
}

/// 采集链路：RECEIVE -> PARSE -> DISCOVER -> PUBLISH。
///
/// 单个值的错误只影响该值；接收失败结束当前周期，下一次触发照常进行。
pub struct SensorFlow {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    publisher: Arc<dyn Publisher>,
    registry: AvailableDatapointsRegistry,
    event_log: EventLog,
    topics: Topics,
    routing: watch::Receiver<Routing>,
}

impl SensorFlow {
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        publisher: Arc<dyn Publisher>,
        registry: AvailableDatapointsRegistry,
        event_log: EventLog,
        topics: Topics,
        routing: watch::Receiver<Routing>,
    ) -> Self {
        Self {
            transport,
            codec,
            publisher,
            registry,
            event_log,
            topics,
            routing,
        }
    }

    /// 完整执行一次周期。
    pub async fn run_cycle(&self) -> Result<CycleReport, SensorFlowError> {
        let span = info_span!("sensor_cycle", cycle_id = %new_cycle_id());
        async {
            let raw = self.receive().await?;
            self.process(raw).await
        }
        .instrument(span)
        .await
    }

    /// RECEIVE：按需连接后读取一条原始报文。
    pub async fn receive(&self) -> Result<RawMessage, SensorFlowError> {
        let received = match self.transport.connect().await {
            Ok(()) => self.transport.read_raw().await,
            Err(err) => Err(err),
        };
        match received {
            Ok(raw) => Ok(raw),
            Err(err) => {
                record_sensor_cycle_failed();
                self.event_log
                    .warning(format!("receive from {} failed: {}", self.transport.name(), err))
                    .await;
                Err(err.into())
            }
        }
    }

    /// PARSE -> DISCOVER -> PUBLISH。
    pub async fn process(&self, raw: RawMessage) -> Result<CycleReport, SensorFlowError> {
        record_raw_message();
        let outcome = parse_raw(&raw, self.codec.as_ref());
        let message = outcome.message;
        let mut report = CycleReport {
            malformed: outcome.malformed.len(),
            unmapped: message.unmapped.len(),
            ..CycleReport::default()
        };

        for (key, reason) in &outcome.malformed {
            record_dropped_malformed();
            self.event_log
                .warning(format!("dropped malformed value for {}: {}", key, reason))
                .await;
        }
        for key in &message.unmapped {
            record_dropped_unmapped();
            debug!(target: "ems.pipeline", key = %key, "sensor_value_unmapped");
        }

        let discovered = self
            .registry
            .discover(Direction::Sensor, &message.examples)
            .await;
        if !discovered.is_empty() {
            report.discovered = discovered.len();
            record_discoveries(discovered.len() as u64);
            let keys: Vec<&str> = discovered.iter().map(|(key, _)| key.as_str()).collect();
            self.event_log
                .info(format!("discovered sensor datapoints: {}", keys.join(", ")))
                .await;
            // 新 key 先登记再发布值
            self.announce().await?;
        }

        record_parsed_values(message.parsed_values.len() as u64);
        let routing = self.routing.borrow().clone();
        let timestamp = to_epoch_ms(&message.timestamp);
        for (key, value) in message.parsed_values {
            let topic = routing
                .sensor_topic(&key)
                .map(str::to_string)
                .unwrap_or_else(|| self.topics.value(&key));
            let body = ValueMessage { value, timestamp };
            let published = OutboundMessage::json(topic.clone(), &body, false, DeliveryClass::Telemetry)
                .and_then(|message| self.publisher.publish(message));
            if let Err(err) = published {
                record_publish_failure();
                warn!(
                    target: "ems.pipeline",
                    key = %key,
                    topic = %topic,
                    error = %err,
                    published = report.published,
                    "sensor_publish_failed"
                );
                return Err(err.into());
            }
            record_published_value();
            report.published += 1;
        }

        debug!(target: "ems.pipeline", report = ?report, "sensor_cycle_done");
        Ok(report)
    }

    /// 发布当前可用数据点快照（保留）。
    pub async fn announce(&self) -> Result<(), SensorFlowError> {
        let snapshot = self.registry.snapshot().await;
        let message = OutboundMessage::json(
            self.topics.available_datapoints(),
            &snapshot,
            true,
            DeliveryClass::Control,
        )?;
        self.publisher.publish(message)?;
        Ok(())
    }
}
