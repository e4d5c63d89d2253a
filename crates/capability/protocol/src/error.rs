//! 传输错误类型定义

use ems_codec::TranscodeError;

/// 设备传输错误
///
/// 单次采集或写入失败只影响当前周期；适配器在下一次 `connect()` 时自行重连。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// 尚未连接
    #[error("not connected")]
    NotConnected,

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// HTTP 错误
    #[error("http error: {0}")]
    Http(String),

    /// MQTT 错误
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 适配器不支持的操作
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// 值无法放到线路上
    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    /// 通道关闭
    #[error("channel closed")]
    ChannelClosed,
}
