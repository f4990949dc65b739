//! History log backends and checkpoint writer

use super::*;
use crate::tools::ToolMessage;
use serde_json::json;
use std::sync::Arc;

fn started(at: i64, call_id: &str) -> HistoryRecord {
    HistoryRecord::ExecutionStarted(ExecutionStarted {
        at,
        call_id: call_id.to_string(),
        code: "1 + 1".to_string(),
        preamble: String::new(),
    })
}

fn completed(at: i64, call_id: &str) -> HistoryRecord {
    HistoryRecord::ExecutionCompleted(ExecutionCompleted {
        at,
        call_id: call_id.to_string(),
        output: "2".to_string(),
        printed_so_far: vec![],
        tool_call_count: 0,
        is_error: false,
    })
}

/* ===================== Records ===================== */

#[test]
fn test_record_serializes_with_type_tag() {
    let record = HistoryRecord::ToolCompleted {
        at: 5,
        tool_call_id: "call-1".to_string(),
        result: ToolMessage::error("boom"),
    };
    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(value["type"], "tool_completed");
    assert_eq!(value["result"]["is_error"], true);
    assert_eq!(record.kind(), "tool_completed");

    let value = serde_json::to_value(started(1, "call-1")).unwrap();
    assert_eq!(value["type"], "execution_started");
    assert_eq!(value["call_id"], "call-1");
}

/* ===================== JSONL ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_jsonl_appends_and_loads_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let log = JsonlHistoryLog::open(dir.path(), "s1").await.unwrap();

    log.append(&started(1, "a")).await.unwrap();
    log.append(&completed(2, "a")).await.unwrap();

    let records = log.load_all().await.unwrap();
    assert_eq!(records, vec![started(1, "a"), completed(2, "a")]);
    assert!(log.path().ends_with("s1.jsonl"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jsonl_missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let log = JsonlHistoryLog::open(&dir.path().join("nested"), "fresh").await.unwrap();
    assert!(log.load_all().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jsonl_torn_final_line_is_skipped_then_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s1.jsonl");
    let first = serde_json::to_string(&started(1, "a")).unwrap();
    std::fs::write(&path, format!("{}\n{{\"type\":\"execution_comp", first)).unwrap();

    let log = JsonlHistoryLog::open(dir.path(), "s1").await.unwrap();
    assert_eq!(log.load_all().await.unwrap(), vec![started(1, "a")]);

    log.append(&completed(2, "a")).await.unwrap();
    assert_eq!(
        log.load_all().await.unwrap(),
        vec![started(1, "a"), completed(2, "a")]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jsonl_corruption_before_the_end_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s1.jsonl");
    let last = serde_json::to_string(&started(1, "a")).unwrap();
    std::fs::write(&path, format!("not json\n{}\n", last)).unwrap();

    let log = JsonlHistoryLog::open(dir.path(), "s1").await.unwrap();
    match log.load_all().await {
        Err(HistoryError::Corrupt { line, .. }) => assert_eq!(line, 1),
        other => panic!("Expected Corrupt, got {:?}", other),
    }
}

/* ===================== SQLite ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_sqlite_keeps_sessions_apart() {
    let log = SqliteHistoryLog::connect("sqlite::memory:", "s1").await.unwrap();
    let other = SqliteHistoryLog::with_pool(log.pool().clone(), "s2").await.unwrap();

    log.append(&started(1, "a")).await.unwrap();
    other.append(&started(1, "b")).await.unwrap();
    log.append(&completed(1, "a")).await.unwrap();

    assert_eq!(
        log.load_all().await.unwrap(),
        vec![started(1, "a"), completed(1, "a")]
    );
    assert_eq!(other.load_all().await.unwrap(), vec![started(1, "b")]);
}

/* ===================== Writer ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_writer_timestamps_never_decrease() {
    let far_future = chrono::Utc::now().timestamp_millis() + 60_000;
    let log: Arc<dyn HistoryLog> = Arc::new(MemoryHistoryLog::with_records(vec![started(
        far_future, "a",
    )]));

    let writer = CheckpointWriter::open(log.clone(), "s1").await.unwrap();
    let record = writer.assistant_message("hello").await.unwrap();
    assert_eq!(record.at(), far_future);

    writer
        .tool_invoked(ToolCall {
            id: "call-1".to_string(),
            name: "run_script".to_string(),
            arguments: json!({ "code": "1" }),
        })
        .await
        .unwrap();

    let records = log.load_all().await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.windows(2).all(|w| w[0].at() <= w[1].at()));
}

#[test]
fn test_memory_log_round_trip_on_blocking_runtime() {
    let log = MemoryHistoryLog::new();
    tokio_test::block_on(async {
        log.append(&started(1, "a")).await.unwrap();
        assert_eq!(log.load_all().await.unwrap(), vec![started(1, "a")]);
    });
}
