//! 存储层错误类型
//!
//! 封装底层错误：
//! - SQL / COPY 执行错误
//! - 连接错误
//! - CSV 编码错误

#[derive(Debug)]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<csv::Error> for StorageError {
    fn from(err: csv::Error) -> Self {
        Self::new(format!("csv encode: {err}"))
    }
}
