mod common;

use common::{row, ts, MemorySource};
use pg_watermark_sync::sink::JsonLinesSink;
use pg_watermark_sync::store::FileWatermarkStore;
use pg_watermark_sync::{
    CursorValue, RunStatus, SyncOrchestrator, SyncSettings, TableSpec, WatermarkKey, WatermarkStore,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn read_load_files(dir: &Path) -> Vec<Value> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();

    files
        .iter()
        .flat_map(|path| {
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jsonl"));
            std::fs::read_to_string(path)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str::<Value>(line).unwrap())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[tokio::test]
async fn test_watermark_recovery_across_processes() {
    let temp_dir = TempDir::new().unwrap();
    let state_path = temp_dir.path().join("state").join("watermarks.json");
    let out_dir = temp_dir.path().join("out");
    let table = TableSpec::new("applications", "updated_at");

    let source = Arc::new(MemorySource::new());
    source.insert("applications", row(1, "updated_at", "2024-01-01"));
    source.insert("applications", row(2, "updated_at", "2024-01-02"));

    // First process
    {
        let sync = SyncOrchestrator::new(
            source.clone(),
            Arc::new(JsonLinesSink::new(&out_dir, "raw_intern_tracker")),
            Arc::new(FileWatermarkStore::new(&state_path)),
            vec![table.clone()],
            SyncSettings::default(),
        );
        let report = sync.run(CancellationToken::new()).await;
        assert_eq!(report.status, RunStatus::Succeeded);
    }

    source.insert("applications", row(3, "updated_at", "2024-01-03"));

    // Simulate restart
    {
        let store = Arc::new(FileWatermarkStore::new(&state_path));
        assert_eq!(
            store.get(&table.key()).await.unwrap().map(|w| w.value),
            Some(ts("2024-01-02"))
        );

        let sync = SyncOrchestrator::new(
            source.clone(),
            Arc::new(JsonLinesSink::new(&out_dir, "raw_intern_tracker")),
            store.clone(),
            vec![table.clone()],
            SyncSettings::default(),
        );
        let report = sync.run(CancellationToken::new()).await;
        assert_eq!(report.results[0].rows_processed, 1);
        assert_eq!(
            store.get(&table.key()).await.unwrap().map(|w| w.value),
            Some(ts("2024-01-03"))
        );
    }

    let records = read_load_files(&out_dir.join("raw_intern_tracker").join("applications"));
    let ids: Vec<i64> = records.iter().filter_map(|r| r["id"].as_i64()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(records.iter().all(|r| r["_load_id"].is_string()));
}

#[tokio::test]
async fn test_concurrent_commits_for_different_tables() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileWatermarkStore::new(temp_dir.path().join("watermarks.json")));

    let names = [
        ("applications", "updated_at"),
        ("application_status_events", "changed_at"),
        ("application_followups", "followup_at"),
        ("application_contacts", "created_at"),
        ("application_events", "created_at"),
    ];

    let handles: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, (table, column))| {
            let store = store.clone();
            let key = WatermarkKey::new(*table, *column);
            tokio::spawn(async move {
                store.set(&key, &CursorValue::Integer(i as i64 * 100)).await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // No commit lost another's update.
    let stored = store.list().await.unwrap();
    assert_eq!(stored.len(), names.len());

    let reopened = FileWatermarkStore::new(store.path());
    let events = reopened
        .get(&WatermarkKey::new("application_events", "created_at"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(events.value, CursorValue::Integer(400));
}

#[tokio::test]
async fn test_corrupt_state_fails_every_table() {
    let temp_dir = TempDir::new().unwrap();
    let state_path = temp_dir.path().join("watermarks.json");
    std::fs::write(&state_path, "{ not json").unwrap();

    let source = Arc::new(MemorySource::new());
    source.insert("applications", row(1, "updated_at", "2024-01-01"));

    let sync = SyncOrchestrator::new(
        source.clone(),
        Arc::new(JsonLinesSink::new(temp_dir.path().join("out"), "raw_intern_tracker")),
        Arc::new(FileWatermarkStore::new(&state_path)),
        vec![TableSpec::new("applications", "updated_at")],
        SyncSettings::default(),
    );
    let report = sync.run(CancellationToken::new()).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(source.reads(), 0);
    // The broken file is left for an operator to inspect.
    assert_eq!(std::fs::read_to_string(&state_path).unwrap(), "{ not json");
}
