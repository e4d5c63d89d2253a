//! # 设备传输能力模块
//!
//! 每种设备协议实现一个 [`Transport`]，向采集链路提供原始报文、向执行器链路提供写入能力：
//! - **Modbus TCP**：按点位表读取寄存器/线圈（轮询）
//! - **TCP Client**：按行分帧的套接字设备（有请求命令时轮询，否则设备主动上报）
//! - **HTTP**：GET 读取、POST 写入（轮询）
//! - **MQTT**：订阅上游设备 Broker（上报）
//! - **KNXnet/IP**：路由组播中的组报文（上报）
//!
//! ## 架构设计
//!
//! ```text
//! EMS_TRANSPORT + EMS_TRANSPORT_CONFIG
//!       │
//!       ▼
//! Arc<dyn Transport>
//!       │
//!       ├── Dispatcher → SensorFlow → read_raw()
//!       └── ActuatorFlow → write_raw()
//! ```
//!
//! ## 配置格式
//!
//! ### Modbus TCP
//! ```json
//! { "host": "192.168.1.100", "port": 502, "slave_id": 1,
//!   "points": [{ "key": "temp_1", "function_code": 3, "register_address": 100, "register_count": 1 }] }
//! ```
//!
//! ### TCP Client
//! ```json
//! { "host": "192.168.1.50", "port": 9000, "request_command": "READ" }
//! ```

mod error;
mod http_poll;
mod knx_ip;
mod modbus_tcp;
mod mqtt_upstream;
mod tcp_client;
mod types;

pub use error::TransportError;
pub use http_poll::{HttpPollConfig, HttpPollTransport};
pub use knx_ip::{
    GroupTelegram, KnxIpConfig, KnxIpTransport, decode_routing_indication, encode_group_write,
    format_group_address, parse_group_address,
};
pub use modbus_tcp::{ModbusPoint, ModbusTcpConfig, ModbusTcpTransport};
pub use mqtt_upstream::{MqttUpstreamConfig, MqttUpstreamTransport, topic_to_key};
pub use tcp_client::{TcpClientConfig, TcpClientTransport};
pub use types::{ReadMode, wire_to_json, wire_to_text};

use async_trait::async_trait;
use domain::{RawMessage, WireValue};

/// 设备传输抽象。
///
/// 采集与执行两个工作任务共享同一个实例，实现内部自行串行化对连接的访问。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 传输名称（日志用）。
    fn name(&self) -> &str;

    fn read_mode(&self) -> ReadMode;

    /// 建立连接；已连接时为空操作。
    async fn connect(&self) -> Result<(), TransportError>;

    async fn read_raw(&self) -> Result<RawMessage, TransportError>;

    async fn write_raw(&self, key: &str, value: &WireValue) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
