//! 内存记录存储实现

use crate::RecordStore;
use crate::error::StorageError;
use async_trait::async_trait;
use domain::{Heartbeat, LogEntry};
use std::collections::VecDeque;
use std::sync::RwLock;

/// 内存记录存储
///
/// 日志按到达顺序保存，超过 `capacity` 时丢弃最旧的一条。
pub struct InMemoryRecordStore {
    capacity: usize,
    logs: RwLock<VecDeque<LogEntry>>,
    heartbeat: RwLock<Option<Heartbeat>>,
}

impl InMemoryRecordStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            logs: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            heartbeat: RwLock::new(None),
        }
    }

    /// 最近的日志（新 -> 旧），最多 `limit` 条
    pub fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.logs
            .read()
            .map(|logs| logs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_heartbeat(&self) -> Option<Heartbeat> {
        self.heartbeat.read().ok().and_then(|hb| *hb)
    }

    /// 获取日志数量（用于测试）
    pub fn len(&self) -> usize {
        self.logs.read().map(|logs| logs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn record_log(&self, entry: &LogEntry) -> Result<(), StorageError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut logs = self
            .logs
            .write()
            .map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))?;
        while logs.len() >= self.capacity {
            logs.pop_front();
        }
        logs.push_back(entry.clone());
        Ok(())
    }

    async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StorageError> {
        let mut last = self
            .heartbeat
            .write()
            .map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))?;
        *last = Some(*heartbeat);
        Ok(())
    }
}

/// 空存储（不落地任何记录）
#[derive(Debug, Default)]
pub struct NoopRecordStore;

#[async_trait]
impl RecordStore for NoopRecordStore {
    async fn record_log(&self, _entry: &LogEntry) -> Result<(), StorageError> {
        Ok(())
    }

    async fn record_heartbeat(&self, _heartbeat: &Heartbeat) -> Result<(), StorageError> {
        Ok(())
    }
}
