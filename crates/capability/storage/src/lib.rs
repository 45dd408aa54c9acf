//! # Relay Storage 模块
//!
//! 批量存储抽象层：入库进程把一个时间窗口内累积的读数作为一次操作追加到表中。
//!
//! ## 模块说明
//!
//! - [`traits`]：`BatchStore` 接口
//! - [`error`]：存储错误类型
//! - [`connection`]：PostgreSQL 连接池管理
//! - [`postgres`]：`COPY ... FROM STDIN` 批量追加
//! - [`in_memory`]：内存实现（测试用）
//!
//! 表结构由部署方维护，列为 `(time, equipment, tagnum, value)`。

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod postgres;
pub mod traits;

pub use connection::connect_pool;
pub use error::StorageError;
pub use in_memory::InMemoryBatchStore;
pub use postgres::{PgBatchStore, encode_csv, validate_table};
pub use traits::BatchStore;
