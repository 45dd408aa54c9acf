//! SQL 直查型仪器：每通道执行 `QueryText`，取首行首列。

use crate::driver::TransportDriver;
use crate::error::{ChannelFault, ProtocolError};
use crate::types::ChannelOutcome;
use async_trait::async_trait;
use bus_contract::Direction;
use domain::ReadingValue;
use relay_normalize::{ChannelRow, decode_scalar};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// 单值查询能力。
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn query_scalar(&self, sql: &str) -> Result<ReadingValue, ProtocolError>;
}

pub struct PgQueryRunner {
    pool: PgPool,
}

impl PgQueryRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// NUMERIC 按浮点读数上报。
fn decimal_reading(value: Decimal) -> Result<ReadingValue, ProtocolError> {
    value
        .to_f64()
        .map(ReadingValue::Number)
        .ok_or_else(|| ProtocolError::DataParse(format!("numeric {value} out of f64 range")))
}

/// 依次尝试常见列类型。
fn first_column(row: &PgRow) -> Result<ReadingValue, ProtocolError> {
    if let Ok(v) = row.try_get::<Option<f64>, _>(0) {
        return Ok(v.map_or(ReadingValue::Null, ReadingValue::Number));
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(0) {
        return Ok(v.map_or(ReadingValue::Null, |v| ReadingValue::Number(f64::from(v))));
    }
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(0) {
        return v.map_or(Ok(ReadingValue::Null), decimal_reading);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(0) {
        return Ok(v.map_or(ReadingValue::Null, ReadingValue::Integer));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(0) {
        return Ok(v.map_or(ReadingValue::Null, |v| ReadingValue::Integer(i64::from(v))));
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(0) {
        return Ok(v.map_or(ReadingValue::Null, |v| ReadingValue::Integer(i64::from(v))));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(0) {
        return Ok(v.map_or(ReadingValue::Null, ReadingValue::Bool));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(0) {
        return Ok(v.map_or(ReadingValue::Null, ReadingValue::Text));
    }
    Err(ProtocolError::DataParse("unsupported first column type".to_string()))
}

#[async_trait]
impl QueryRunner for PgQueryRunner {
    async fn query_scalar(&self, sql: &str) -> Result<ReadingValue, ProtocolError> {
        let row = sqlx::query(sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?
            .ok_or_else(|| ProtocolError::DataParse("query returned no rows".to_string()))?;
        first_column(&row)
    }
}

pub struct SqlDriver {
    runner: Box<dyn QueryRunner>,
}

impl SqlDriver {
    pub fn new(runner: Box<dyn QueryRunner>) -> Self {
        Self { runner }
    }

    async fn read_one(&self, row: &ChannelRow) -> Result<ReadingValue, ChannelFault> {
        let sql = row
            .descriptor
            .query_text
            .as_deref()
            .ok_or(ChannelFault::MissingField("QueryText"))?;
        let raw = self.runner.query_scalar(sql).await?;
        Ok(decode_scalar(&raw, &row.descriptor))
    }
}

#[async_trait]
impl TransportDriver for SqlDriver {
    fn name(&self) -> &'static str {
        "PostGreSQL"
    }

    fn supports(&self, direction: Direction) -> bool {
        direction == Direction::Read
    }

    async fn read(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let result = self.read_one(row).await;
            outcomes.push(ChannelOutcome {
                tagnum: row.tagnum.clone(),
                result,
            });
        }
        outcomes
    }

    async fn write(&mut self, rows: &[ChannelRow]) -> Vec<ChannelOutcome> {
        rows.iter()
            .map(|row| {
                ChannelOutcome::fault(
                    &row.tagnum,
                    ChannelFault::Transport("SQL transport is read-only".to_string()),
                )
            })
            .collect()
    }
}
