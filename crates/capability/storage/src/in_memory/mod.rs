//! 内存存储实现
//!
//! 用于测试与无数据库的本地运行。

mod batch;

pub use batch::InMemoryBatchStore;
