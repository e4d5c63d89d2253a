use ems_bridge::BridgeError;
use ems_protocol::TransportError;

/// 采集链路错误。
#[derive(Debug, thiserror::Error)]
pub enum SensorFlowError {
    #[error("receive failed: {0}")]
    Receive(#[from] TransportError),
    #[error("publish failed: {0}")]
    Publish(#[from] BridgeError),
}

/// 连接器运行时错误。
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
    #[error("task error: {0}")]
    Task(String),
}
