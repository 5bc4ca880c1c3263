//! Integration: history export, clear and import through the CLI harness.

use std::process::Command;
use std::sync::Arc;

use serde_json::{json, Value};
use simlab::{Algorithm, HistoryStore, KvStore, RunConfiguration, RunResult, SqliteStore};
use tempfile::tempdir;

fn harness() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_simlab_harness"))
}

fn run(args: &[&str]) -> String {
    let out = Command::new(harness())
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("spawn harness");
    assert!(
        out.status.success(),
        "harness {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn seed(db: &std::path::Path, runs: usize) {
    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(db, None).expect("open"));
    let history = HistoryStore::new(store);
    for i in 0..runs {
        let makespan = 100.0 + i as f64;
        history
            .append(
                &RunResult::new(Algorithm::Eaco, json!({ "summary": { "makespan": makespan } })),
                &RunResult::new(Algorithm::Epso, json!({ "summary": { "makespan": makespan + 1.0 } })),
                &RunConfiguration::default(),
            )
            .expect("append");
    }
}

#[test]
fn export_clear_import_roundtrip() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("simlab.db");
    let db_arg = db.to_str().expect("utf8 path");
    seed(&db, 2);

    let stats: Value = serde_json::from_str(&run(&["history-stats", db_arg])).expect("stats json");
    assert_eq!(stats["totalEntries"], 4);
    assert_eq!(stats["simulationRuns"], 2);

    let exported = run(&["history-export", db_arg]);
    let document: Value = serde_json::from_str(&exported).expect("export json");
    assert_eq!(document["entries"].as_array().map(Vec::len), Some(4));
    assert!(document["exportDate"].is_string());
    let export_file = tmp.path().join("history.json");
    std::fs::write(&export_file, &exported).expect("write export");

    run(&["history-clear", db_arg]);
    let stats: Value = serde_json::from_str(&run(&["history-stats", db_arg])).expect("stats json");
    assert_eq!(stats["totalEntries"], 0);

    let imported = run(&["history-import", export_file.to_str().expect("utf8"), db_arg]);
    assert_eq!(imported, "4");
    let stats: Value = serde_json::from_str(&run(&["history-stats", db_arg])).expect("stats json");
    assert_eq!(stats["totalEntries"], 4);
}

#[test]
fn import_rejects_documents_without_entries() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("simlab.db");
    let bad = tmp.path().join("bad.json");
    std::fs::write(&bad, r#"{"version":1}"#).expect("write");

    let out = Command::new(harness())
        .args(["history-import", bad.to_str().unwrap(), db.to_str().unwrap()])
        .env("RUST_LOG", "off")
        .output()
        .expect("spawn harness");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid history document"));
}

#[test]
fn cache_commands_report_an_empty_cache() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("simlab.db");
    let db_arg = db.to_str().expect("utf8 path");

    let stats: Value = serde_json::from_str(&run(&["cache-stats", db_arg])).expect("stats json");
    assert_eq!(stats["totalCached"], 0);
    assert_eq!(stats["totalSizeFormatted"], "0 Bytes");
    assert_eq!(run(&["cache-clear", db_arg]), "0");
}

#[test]
fn unknown_command_prints_usage() {
    let out = Command::new(harness())
        .arg("frobnicate")
        .output()
        .expect("spawn harness");
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage"));
}
