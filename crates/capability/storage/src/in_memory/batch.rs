//! 批量写入内存实现

use crate::error::StorageError;
use crate::traits::BatchStore;
use domain::BatchRow;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 批量写入内存存储
#[derive(Default)]
pub struct InMemoryBatchStore {
    rows: RwLock<Vec<BatchRow>>,
    appends: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储故障（用于测试）
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<BatchRow> {
        self.rows.read().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 成功的追加操作次数
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn append_rows(&self, rows: &[BatchRow]) -> Result<u64, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::new("store unavailable"));
        }
        let mut stored = self
            .rows
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        stored.extend_from_slice(rows);
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(rows.len() as u64)
    }
}
