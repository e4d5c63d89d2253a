//! 出站/入站报文与发布接口。

use crate::error::BridgeError;
use crate::topics::CommandKind;
use domain::Heartbeat;
use serde::Serialize;
use std::collections::BTreeSet;

/// 投递类别，决定断线期间的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    /// 周期性读数与心跳：断线时直接丢弃，不补发过期数据。
    Telemetry,
    /// 日志、发现公告、映射、指令回执：断线时进入有界积压队列。
    Control,
}

/// 出站报文（统一 QoS 2）。
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
    pub class: DeliveryClass,
}

impl OutboundMessage {
    pub fn telemetry(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            retain: false,
            class: DeliveryClass::Telemetry,
        }
    }

    pub fn control(topic: impl Into<String>, payload: Vec<u8>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload,
            retain,
            class: DeliveryClass::Control,
        }
    }

    /// 以 JSON 序列化载荷。
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        body: &T,
        retain: bool,
        class: DeliveryClass,
    ) -> Result<Self, BridgeError> {
        let payload = serde_json::to_vec(body).map_err(|err| BridgeError::Payload(err.to_string()))?;
        Ok(Self {
            topic: topic.into(),
            payload,
            retain,
            class,
        })
    }
}

/// 发布接口。实现必须是非阻塞的，可在任意上下文调用。
pub trait Publisher: Send + Sync {
    fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError>;
}

/// 总线会话：发布之外还负责订阅集合与主动断开。
pub trait BusSession: Publisher {
    /// 替换订阅集合（新增订阅、移除退订）。
    fn set_subscriptions(&self, topics: BTreeSet<String>) -> Result<(), BridgeError>;

    fn disconnect(&self);
}

/// 入站指令。
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCommand {
    pub topic: String,
    /// 指令 topic 前缀（去掉 `/value|/setpoint|/schedule`）。
    pub base: String,
    pub kind: CommandKind,
    pub payload: Vec<u8>,
}

/// 桥接事件，由网络上下文投递给运行时。
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// 已连接（含重连成功），订阅已恢复。
    Connected,
    ConnectionLost(String),
    DatapointMap(Vec<u8>),
    Command(InboundCommand),
    Heartbeat(Heartbeat),
}
