//! PostgreSQL 存储实现
//!
//! 批量写入使用 `COPY <table> (time, equipment, tagnum, value) FROM STDIN WITH (FORMAT csv)`，
//! 整批一次提交。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use relay_storage::{BatchStore, PgBatchStore};
//!
//! let store = PgBatchStore::connect("postgresql://relay@localhost:5432/plant", "readings").await?;
//! let written = store.append_rows(&rows).await?;
//! ```

mod batch;

pub use batch::{PgBatchStore, encode_csv, validate_table};
