//! 连接器领域模型：数据点、原始报文、解析结果、心跳与总线报文。

pub mod data;
pub mod message;
pub mod time;

pub use data::{
    DataFormat, DatapointMeta, Direction, Heartbeat, ParsedMessage, RawMessage, RawPayload,
    TypedValue, WireValue,
};
pub use message::{
    AvailableDatapoints, CommandErrorMessage, DatapointMap, HeartbeatMessage, LogEntry, LogLevel,
    ValueMessage,
};
pub use time::{from_epoch_ms, now_epoch_ms, to_epoch_ms};
