//! 总线桥接（Broker Bridge）
//!
//! 维护与 MQTT Broker 的会话：
//! - 按当前集合订阅指令 topic 与 `datapoint_map`，每次 ConnAck 重新订阅
//! - 所有发布统一 QoS 2；断线时遥测丢弃、控制类报文进入有界积压队列
//! - 固定周期心跳，与采集调度无关
//! - 非主动断线自动重连，主动断开后不再重连
//!
//! 入站报文不在网络任务中处理，而是以 [`BridgeEvent`] 投递给运行时。
//!
//! ```rust,ignore
//! let (bridge, mut events) = BrokerBridge::new(config);
//! let handle = bridge.handle();
//! handle.set_subscriptions(topics)?;
//! let tasks = bridge.spawn();
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

mod bridge;
mod error;
mod message;
mod state;
mod topics;

pub use bridge::{BridgeConfig, BridgeHandle, BridgeTasks, BrokerBridge};
pub use error::BridgeError;
pub use message::{
    BridgeEvent, BusSession, DeliveryClass, InboundCommand, OutboundMessage, Publisher,
};
pub use state::{Backlog, ConnectionMachine, ConnectionState};
pub use topics::{CommandKind, InboundTopic, Topics};
