//! 存储层错误类型
//!
//! 持久化失败只记录告警与计数，不会中断采集或执行链路。

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 存储后端暂不可用（锁中毒、连接断开等）
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// 记录被后端拒绝
    #[error("record rejected: {0}")]
    Rejected(String),
}
