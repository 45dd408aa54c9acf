use domain::{Reading, ReadingValue, ResultEnvelope, parse_time};
use relay_pipeline::{BatchConfig, BatchWriter, IngestOutcome, PipelineError};
use relay_storage::InMemoryBatchStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn envelope(equipment: &str, readings: &[(&str, ReadingValue)]) -> ResultEnvelope {
    let time = parse_time("2024-05-01 10:00:00").expect("time");
    let mut envelope = ResultEnvelope::new(equipment);
    for (tagnum, value) in readings {
        envelope.insert(*tagnum, Reading::new(value.clone(), time));
    }
    envelope
}

#[tokio::test]
async fn batch_accumulates_then_flushes_once() {
    let store = Arc::new(InMemoryBatchStore::new());
    let t0 = Instant::now();
    let mut writer = BatchWriter::starting_at(store.clone(), BatchConfig::default(), t0);

    let first = writer
        .ingest_at(&envelope("PLC", &[("A", ReadingValue::Number(1.0))]), t0 + Duration::from_millis(500))
        .await
        .expect("ingest");
    assert_eq!(first, IngestOutcome::Buffered { pending: 1 });
    assert!(store.is_empty());

    let second = writer
        .ingest_at(
            &envelope("PLC", &[("B", ReadingValue::Text("ON".into()))]),
            t0 + Duration::from_millis(1_000),
        )
        .await
        .expect("ingest");
    assert_eq!(second, IngestOutcome::Flushed { rows: 2 });
    assert_eq!(store.append_count(), 1);
    assert_eq!(store.len(), 2);
    assert!(writer.pending().is_empty());
}

#[tokio::test]
async fn failed_flush_keeps_rows_for_next_window() {
    let store = Arc::new(InMemoryBatchStore::new());
    let t0 = Instant::now();
    let mut writer = BatchWriter::starting_at(store.clone(), BatchConfig::default(), t0);
    store.set_failing(true);

    let err = writer
        .ingest_at(
            &envelope("PLC", &[("A", ReadingValue::Text("NULL".into()))]),
            t0 + Duration::from_secs(2),
        )
        .await;
    assert!(matches!(err, Err(PipelineError::Writer(_))));
    assert_eq!(writer.pending().len(), 1);
    assert!(writer.pending()[0].value.is_nan());

    store.set_failing(false);
    // 窗口已重置，0.5 秒后仍缓冲
    let buffered = writer
        .ingest_at(&envelope("PLC", &[("B", ReadingValue::Integer(3))]), t0 + Duration::from_millis(2_500))
        .await
        .expect("ingest");
    assert_eq!(buffered, IngestOutcome::Buffered { pending: 2 });

    let flushed = writer
        .ingest_at(&envelope("PLC", &[("C", ReadingValue::Integer(4))]), t0 + Duration::from_secs(3))
        .await
        .expect("ingest");
    assert_eq!(flushed, IngestOutcome::Flushed { rows: 3 });
}

#[tokio::test]
async fn pending_limit_applies_backpressure() {
    let store = Arc::new(InMemoryBatchStore::new());
    let config = BatchConfig {
        max_pending_rows: 2,
        ..BatchConfig::default()
    };
    let t0 = Instant::now();
    let mut writer = BatchWriter::starting_at(store, config, t0);

    writer
        .ingest_at(
            &envelope("PLC", &[("A", ReadingValue::Integer(1)), ("B", ReadingValue::Integer(2))]),
            t0,
        )
        .await
        .expect("ingest");
    let err = writer
        .ingest_at(&envelope("PLC", &[("C", ReadingValue::Integer(3))]), t0)
        .await;
    assert!(matches!(err, Err(PipelineError::Backpressure(_))));
    assert_eq!(writer.pending().len(), 2);
}

#[tokio::test]
async fn backlog_drains_once_store_recovers() {
    let store = Arc::new(InMemoryBatchStore::new());
    let config = BatchConfig {
        max_pending_rows: 2,
        ..BatchConfig::default()
    };
    let t0 = Instant::now();
    let mut writer = BatchWriter::starting_at(store.clone(), config, t0);
    store.set_failing(true);

    writer
        .ingest_at(&envelope("PLC", &[("A", ReadingValue::Integer(1))]), t0)
        .await
        .expect("ingest");
    let failed = writer
        .ingest_at(&envelope("PLC", &[("B", ReadingValue::Integer(2))]), t0 + Duration::from_secs(1))
        .await;
    assert!(matches!(failed, Err(PipelineError::Writer(_))));
    assert_eq!(writer.pending().len(), 2);

    // 积压已满且库仍不可用：拒绝新行
    let rejected = writer
        .ingest_at(&envelope("PLC", &[("C", ReadingValue::Integer(3))]), t0 + Duration::from_secs(2))
        .await;
    assert!(matches!(rejected, Err(PipelineError::Backpressure(_))));
    assert_eq!(writer.pending().len(), 2);

    store.set_failing(false);
    let recovered = writer
        .ingest_at(&envelope("PLC", &[("D", ReadingValue::Integer(4))]), t0 + Duration::from_secs(10))
        .await
        .expect("ingest");
    assert_eq!(recovered, IngestOutcome::Flushed { rows: 2 });
    assert_eq!(store.len(), 2);
    assert_eq!(writer.pending().len(), 1);
    assert_eq!(writer.pending()[0].tagnum, "D");

    let next = writer
        .ingest_at(&envelope("PLC", &[("E", ReadingValue::Integer(5))]), t0 + Duration::from_secs(11))
        .await
        .expect("ingest");
    assert_eq!(next, IngestOutcome::Flushed { rows: 2 });
    assert_eq!(store.len(), 4);
}
