//! # EMS Storage 模块
//!
//! 连接器与元数据库之间的窄接口：只负责落地日志与心跳。
//! 元数据库本身（表结构、管理界面）不在本 workspace 范围内。
//!
//! - [`RecordStore`]：持久化协作接口
//! - [`InMemoryRecordStore`]：有界日志环 + 最近一次心跳（状态端点与测试使用）
//! - [`NoopRecordStore`]：丢弃所有记录

mod error;
mod in_memory;

pub use error::StorageError;
pub use in_memory::{InMemoryRecordStore, NoopRecordStore};

use async_trait::async_trait;
use domain::{Heartbeat, LogEntry};

/// 日志与心跳持久化接口
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 记录一条日志
    async fn record_log(&self, entry: &LogEntry) -> Result<(), StorageError>;

    /// 记录最近一次心跳
    async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StorageError>;
}
