//! Postgres 批量追加实现

use crate::error::StorageError;
use crate::traits::BatchStore;
use domain::{BatchRow, BatchValue, format_time};
use sqlx::PgPool;
use sqlx::postgres::PgPoolCopyExt;
use tracing::debug;

pub struct PgBatchStore {
    pub pool: PgPool,
    table: String,
}

impl PgBatchStore {
    pub fn new(pool: PgPool, table: &str) -> Result<Self, StorageError> {
        Ok(Self {
            pool,
            table: validate_table(table)?,
        })
    }

    pub async fn connect(database_url: &str, table: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Self::new(pool, table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

/// 校验表名（可带 schema），返回加引号的标识符。
pub fn validate_table(table: &str) -> Result<String, StorageError> {
    let parts: Vec<&str> = table.trim().split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err(StorageError::new(format!("invalid table name: {table}")));
    }
    let mut quoted = Vec::with_capacity(parts.len());
    for part in parts {
        let mut chars = part.chars();
        let valid_head = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_head || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StorageError::new(format!("invalid table name: {table}")));
        }
        quoted.push(format!("\"{part}\""));
    }
    Ok(quoted.join("."))
}

fn value_to_field(value: &BatchValue) -> String {
    match value {
        BatchValue::Number(v) if v.is_nan() => "NaN".to_string(),
        BatchValue::Number(v) if v.is_infinite() => {
            if *v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        }
        BatchValue::Number(v) => v.to_string(),
        BatchValue::Text(v) => v.clone(),
        // CSV 中未加引号的空字段即 NULL
        BatchValue::Null => String::new(),
    }
}

/// 整批编码为 CSV 载荷。
pub fn encode_csv(rows: &[BatchRow]) -> Result<Vec<u8>, StorageError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record([
            format_time(&row.time),
            row.equipment.clone(),
            row.tagnum.clone(),
            value_to_field(&row.value),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|err| StorageError::new(format!("csv flush: {err}")))
}

#[async_trait::async_trait]
impl BatchStore for PgBatchStore {
    async fn append_rows(&self, rows: &[BatchRow]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let payload = encode_csv(rows)?;
        let statement = format!(
            "COPY {} (time, equipment, tagnum, value) FROM STDIN WITH (FORMAT csv)",
            self.table
        );
        let mut copy = self.pool.copy_in_raw(&statement).await?;
        let sent = copy.send(payload).await.map(|_| ());
        if let Err(err) = sent {
            // 中止本次 COPY，整批不落库
            let _ = copy.abort(err.to_string()).await;
            return Err(err.into());
        }
        let written = copy.finish().await?;
        debug!(target: "relay.storage", table = %self.table, rows = written, "copy_finished");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::parse_time;

    fn row(tagnum: &str, value: BatchValue) -> BatchRow {
        BatchRow {
            time: parse_time("2024-05-01 10:00:00").expect("time"),
            equipment: "PLC".to_string(),
            tagnum: tagnum.to_string(),
            value,
        }
    }

    #[test]
    fn csv_payload_encodes_sentinels() {
        let payload = encode_csv(&[
            row("A", BatchValue::Number(1.5)),
            row("B", BatchValue::Number(f64::NAN)),
            row("C", BatchValue::Null),
            row("D, E", BatchValue::Text("on".into())),
        ])
        .expect("csv");
        let text = String::from_utf8(payload).expect("utf8");
        assert_eq!(
            text,
            "2024-05-01 10:00:00,PLC,A,1.5\n\
             2024-05-01 10:00:00,PLC,B,NaN\n\
             2024-05-01 10:00:00,PLC,C,\n\
             2024-05-01 10:00:00,PLC,\"D, E\",on\n"
        );
    }

    #[test]
    fn table_names_are_validated() {
        assert_eq!(validate_table("readings").expect("plain"), "\"readings\"");
        assert_eq!(validate_table("plant.readings").expect("schema"), "\"plant\".\"readings\"");
        assert!(validate_table("readings; drop table x").is_err());
        assert!(validate_table("1abc").is_err());
        assert!(validate_table("a.b.c").is_err());
    }
}
