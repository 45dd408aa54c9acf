//! 数据库连接管理
//!
//! - connect_pool：建立 Postgres 连接池（入库进程与 SQL 直查型仪器共用）

use crate::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// 建立 Postgres 连接池
///
/// 单进程串行处理消息，最大连接数限制为 4。
///
/// # 参数
/// - `database_url`：Postgres 连接字符串
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}
