//! 存储接口 Trait 定义
//!
//! - BatchStore：批量追加写入（单次操作写入整批）

use crate::error::StorageError;
use async_trait::async_trait;
use domain::BatchRow;

/// 批量存储接口
///
/// 整批作为一次操作追加；失败时不得部分提交。
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// 追加整批，返回写入行数
    async fn append_rows(&self, rows: &[BatchRow]) -> Result<u64, StorageError>;
}
