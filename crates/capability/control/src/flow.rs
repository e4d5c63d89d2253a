use crate::command::{ActuatorCommand, PlanItem, parse_command};
use crate::error::ActuatorError;
use crate::schedule::ScheduleBook;
use chrono::{DateTime, Utc};
use domain::{CommandErrorMessage, TypedValue, ValueMessage, now_epoch_ms};
use ems_bridge::{DeliveryClass, InboundCommand, OutboundMessage, Publisher, Topics};
use ems_codec::{Codec, ValidationError, validate};
use ems_protocol::Transport;
use ems_telemetry::{record_actuator_write, record_actuator_write_failure, record_validation_rejected};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 执行器链路参数。
#[derive(Debug, Clone, Copy)]
pub struct ActuatorSettings {
    /// 在传输层超时之外再加的整体写入超时。
    pub write_timeout: Duration,
    /// 写入成功后是否在 `<指令 topic>/ack` 回执。
    pub ack: bool,
}

/// 一次指令处理的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorOutcome {
    Written(TypedValue),
    Scheduled {
        applied: Option<TypedValue>,
        pending: usize,
    },
}

/// 执行器链路：VALIDATE -> ENCODE -> WRITE -> ACK。
///
/// 写入失败只记录，不自动重试；指令被拒绝时在 `<指令 topic>/error` 上报。
pub struct ActuatorFlow {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    publisher: Arc<dyn Publisher>,
    settings: ActuatorSettings,
    plans: ScheduleBook,
}

impl ActuatorFlow {
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        publisher: Arc<dyn Publisher>,
        settings: ActuatorSettings,
    ) -> Self {
        Self {
            transport,
            codec,
            publisher,
            settings,
            plans: ScheduleBook::new(),
        }
    }

    pub fn plans(&self) -> &ScheduleBook {
        &self.plans
    }

    pub async fn execute(
        &mut self,
        key: &str,
        command: &InboundCommand,
    ) -> Result<ActuatorOutcome, ActuatorError> {
        self.execute_at(key, command, Utc::now()).await
    }

    /// 处理一条入站指令；失败时已在 error topic 上报，调用方只需记录。
    pub async fn execute_at(
        &mut self,
        key: &str,
        command: &InboundCommand,
        now: DateTime<Utc>,
    ) -> Result<ActuatorOutcome, ActuatorError> {
        let result = self.run(key, command, now).await;
        match &result {
            Ok(outcome) => {
                info!(
                    target: "ems.control",
                    key = %key,
                    topic = %command.topic,
                    outcome = ?outcome,
                    "actuator_command_done"
                );
            }
            Err(err) => self.reject(key, &command.topic, err),
        }
        result
    }

    async fn run(
        &mut self,
        key: &str,
        command: &InboundCommand,
        now: DateTime<Utc>,
    ) -> Result<ActuatorOutcome, ActuatorError> {
        match parse_command(command.kind, &command.payload)? {
            ActuatorCommand::Value { value, .. } => {
                if self.plans.clear(key) {
                    debug!(target: "ems.control", key = %key, "actuator_plan_cleared");
                }
                let written = self.write(key, &value).await?;
                self.acknowledge(&command.topic, &written);
                Ok(ActuatorOutcome::Written(written))
            }
            ActuatorCommand::Plan { items, .. } => {
                // 先整体校验，任何一项不合法都不生效
                let items = self.validate_items(key, items)?;
                let active = self.plans.install(key, &command.topic, items, now);
                let applied = match active {
                    Some(value) => {
                        let written = self.write(key, &value).await?;
                        self.acknowledge(&command.topic, &written);
                        Some(written)
                    }
                    None => None,
                };
                Ok(ActuatorOutcome::Scheduled {
                    applied,
                    pending: self.plans.pending(key),
                })
            }
        }
    }

    /// 写入计划中到期的值，返回成功写入的数量。
    pub async fn apply_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut written = 0;
        for due in self.plans.due(now) {
            match self.write(&due.key, &due.value).await {
                Ok(value) => {
                    written += 1;
                    self.acknowledge(&due.command_topic, &value);
                    info!(
                        target: "ems.control",
                        key = %due.key,
                        value = %value,
                        "actuator_plan_applied"
                    );
                }
                Err(err) => self.reject(&due.key, &due.command_topic, &err),
            }
        }
        written
    }

    fn validate_items(&self, key: &str, items: Vec<PlanItem>) -> Result<Vec<PlanItem>, ActuatorError> {
        let meta = self
            .codec
            .metadata(key)
            .ok_or_else(|| ValidationError::UnknownDatapoint(key.to_string()))?;
        items
            .into_iter()
            .map(|item| -> Result<PlanItem, ActuatorError> {
                let value = validate(meta, &item.value)?;
                Ok(PlanItem { value, ..item })
            })
            .collect()
    }

    /// VALIDATE -> ENCODE -> WRITE，返回实际写入的规范值。
    pub async fn write(&self, key: &str, value: &TypedValue) -> Result<TypedValue, ActuatorError> {
        let meta = self
            .codec
            .metadata(key)
            .ok_or_else(|| ValidationError::UnknownDatapoint(key.to_string()))?;
        let value = validate(meta, value)?;
        let wire = self.codec.encode(key, &value)?;

        let timeout_ms = self.settings.write_timeout.as_millis() as u64;
        // 链路断开后由写入方自行重连，不等待下一次采集周期
        let written = async {
            self.transport.connect().await?;
            self.transport.write_raw(key, &wire).await
        };
        tokio::time::timeout(self.settings.write_timeout, written)
            .await
            .map_err(|_| ActuatorError::Timeout(timeout_ms))??;

        record_actuator_write();
        debug!(target: "ems.control", key = %key, value = %value, wire = %wire, "actuator_written");
        Ok(value)
    }

    fn acknowledge(&self, command_topic: &str, value: &TypedValue) {
        if !self.settings.ack {
            return;
        }
        let body = ValueMessage {
            value: value.clone(),
            timestamp: now_epoch_ms(),
        };
        self.send(Topics::ack_of(command_topic), &body);
    }

    fn reject(&self, key: &str, command_topic: &str, err: &ActuatorError) {
        if err.is_rejection() {
            record_validation_rejected();
        } else {
            record_actuator_write_failure();
        }
        warn!(
            target: "ems.control",
            key = %key,
            topic = %command_topic,
            error = %err,
            rejected = err.is_rejection(),
            "actuator_command_failed"
        );
        let body = CommandErrorMessage {
            error: err.to_string(),
            timestamp: now_epoch_ms(),
        };
        self.send(Topics::error_of(command_topic), &body);
    }

    fn send<T: serde::Serialize>(&self, topic: String, body: &T) {
        let result = OutboundMessage::json(topic, body, false, DeliveryClass::Control)
            .and_then(|message| self.publisher.publish(message));
        if let Err(err) = result {
            warn!(target: "ems.control", error = %err, "actuator_report_failed");
        }
    }
}
