/// 总线桥接错误（BrokerConnectionError）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("broker not connected")]
    NotConnected,
    #[error("mqtt client error: {0}")]
    Client(String),
    #[error("payload error: {0}")]
    Payload(String),
}
