//! # 采集链路与连接器运行时
//!
//! - [`SensorFlow`]：RECEIVE -> PARSE -> DISCOVER -> PUBLISH
//! - [`dispatcher`]：interval / event 两种触发方式
//! - [`Routing`]：数据点与总线 topic 的映射，随 `datapoint_map` 更新
//! - [`Connector`]：组装以上部分与执行器链路，负责启动与有序停机

pub mod dispatcher;
mod error;
mod event_log;
mod parse;
mod registry;
mod routing;
mod runtime;
mod sensor;

pub use dispatcher::{DispatchMode, Trigger};
pub use error::{ConnectorError, SensorFlowError};
pub use event_log::EventLog;
pub use parse::{PAYLOAD_KEY, ParseOutcome, parse_raw};
pub use registry::AvailableDatapointsRegistry;
pub use routing::{Routing, RoutingUpdate};
pub use runtime::{Connector, ConnectorSettings, spawn_connector};
pub use sensor::{CycleReport, SensorFlow};
