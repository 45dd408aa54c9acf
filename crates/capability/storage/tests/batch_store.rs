use domain::{BatchRow, BatchValue, parse_time};
use relay_storage::{BatchStore, InMemoryBatchStore};

fn sample_row(tagnum: &str, value: f64) -> BatchRow {
    BatchRow {
        time: parse_time("2024-05-01 10:00:00").expect("time"),
        equipment: "PLC".to_string(),
        tagnum: tagnum.to_string(),
        value: BatchValue::Number(value),
    }
}

#[tokio::test]
async fn in_memory_appends_whole_batch_once() {
    let store = InMemoryBatchStore::new();
    let rows = vec![sample_row("A", 1.0), sample_row("B", 2.0)];

    let written = store.append_rows(&rows).await.expect("append");

    assert_eq!(written, 2);
    assert_eq!(store.len(), 2);
    assert_eq!(store.append_count(), 1);
    assert_eq!(store.rows()[1].tagnum, "B");
}

#[tokio::test]
async fn failing_store_keeps_nothing() {
    let store = InMemoryBatchStore::new();
    store.set_failing(true);

    let err = store.append_rows(&[sample_row("A", 1.0)]).await;

    assert!(err.is_err());
    assert!(store.is_empty());
    assert_eq!(store.append_count(), 0);
}
