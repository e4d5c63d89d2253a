use ems_codec::{TranscodeError, ValidationError};
use ems_protocol::TransportError;

/// 执行器链路错误。
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("invalid command payload: {0}")]
    Payload(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error("write failed: {0}")]
    Transport(#[from] TransportError),
    #[error("write timed out after {0} ms")]
    Timeout(u64),
}

impl ActuatorError {
    /// 指令本身不合法（未触达设备）。
    pub fn is_rejection(&self) -> bool {
        matches!(self, ActuatorError::Payload(_) | ActuatorError::Validation(_))
    }
}
