//! 编解码与校验错误

/// 线路值与规范类型值之间的转换错误。
///
/// 单个数据点的转换失败只会跳过该数据点，不影响同一报文中的其他 key。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranscodeError {
    #[error("unknown datapoint: {0}")]
    UnknownKey(String),

    #[error("malformed value for {0}: {1}")]
    Malformed(String, String),

    #[error("value for {0} does not fit the wire type: {1}")]
    OutOfRange(String, String),

    #[error("unsupported wire value for {0}: {1}")]
    Unsupported(String, String),
}

/// 执行器指令校验错误，会发布到指令 topic 的 error 子 topic。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown datapoint: {0}")]
    UnknownDatapoint(String),

    #[error("datapoint {0} is not an actuator")]
    NotActuator(String),

    #[error("wrong type for {0}: expected {1}")]
    WrongType(String, String),

    #[error("value for {0} out of range: {1}")]
    OutOfRange(String, String),

    #[error("value for {0} not allowed: {1}")]
    NotAllowed(String, String),
}

/// 数据点配置错误（启动期致命）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("datapoint config parse error: {0}")]
    Parse(String),

    #[error("duplicate datapoint key: {0}")]
    DuplicateKey(String),

    #[error("invalid datapoint key: {0:?}")]
    InvalidKey(String),

    #[error("invalid range for {0}: min_value > max_value")]
    InvalidRange(String),

    #[error("discrete actuator {0} requires allowed_values")]
    MissingAllowedValues(String),

    #[error("invalid wire type for {0}: {1}")]
    InvalidWireType(String, String),
}
