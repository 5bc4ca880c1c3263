//! Integration: history, cache and the resume marker survive reopening the database.

use std::sync::Arc;

use chrono::Utc;
use httpmock::prelude::*;
use serde_json::json;
use simlab::{
    HistoryStore, HttpBackend, KvStore, Orchestrator, OrchestratorOptions, RunConfiguration,
    RunOutcome, SqliteStore,
};
use tempfile::tempdir;

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        settle_delay: std::time::Duration::from_millis(10),
        poll_progress: false,
        ..OrchestratorOptions::default()
    }
}

fn open(path: &std::path::Path) -> Arc<dyn KvStore> {
    Arc::new(SqliteStore::open(path, None).expect("open sqlite store"))
}

#[tokio::test]
async fn completed_run_is_served_from_cache_after_restart() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("simlab.db");
    let server = MockServer::start_async().await;
    let raw = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/raw");
            then.status(200)
                .json_body(json!({ "summary": { "makespan": 321.0 } }));
        })
        .await;

    {
        let backend = HttpBackend::new(server.base_url()).expect("backend");
        let orch = Orchestrator::with_options(Arc::new(backend), open(&db), options());
        assert!(orch.start_run(RunConfiguration::default()).await.is_completed());
        assert_eq!(orch.history_list().len(), 2);
    }
    raw.assert_hits_async(2).await;

    let backend = HttpBackend::new(server.base_url()).expect("backend");
    let orch = Orchestrator::with_options(Arc::new(backend), open(&db), options());
    assert_eq!(orch.history_list().len(), 2);
    assert_eq!(orch.cache().len(), 1);

    let outcome = orch.start_run(RunConfiguration::default()).await;
    assert!(matches!(outcome, RunOutcome::Completed { from_cache: true, .. }));
    raw.assert_hits_async(2).await;
    assert_eq!(
        orch.current_results().expect("results").eaco.summary.makespan,
        Some(321.0)
    );
    // Finished runs leave no resume marker behind.
    assert!(orch.resume_snapshot(Utc::now().timestamp_millis()).is_none());
}

#[test]
fn quota_pressure_keeps_the_newest_pair() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("quota.db");
    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&db, Some(24 * 1024)).expect("open"));
    let history = HistoryStore::new(store);

    let padding = "x".repeat(2_000);
    let mut last = None;
    for i in 0..10 {
        let mut eaco = simlab::RunResult::new(
            simlab::Algorithm::Eaco,
            json!({ "summary": { "makespan": f64::from(i) }, "padding": padding }),
        );
        eaco.simulation_id = Some(format!("run-{i}"));
        let epso = simlab::RunResult::new(
            simlab::Algorithm::Epso,
            json!({ "summary": { "makespan": f64::from(i) + 0.5 }, "padding": padding }),
        );
        let outcome = history
            .append(&eaco, &epso, &RunConfiguration::default())
            .expect("append degrades instead of failing");
        last = Some(outcome.base_id);
    }

    let entries = history.list();
    assert!(!entries.is_empty());
    assert!(entries.len() < 20);
    assert_eq!(entries.len() % 2, 0);
    assert_eq!(Some(entries[0].base_id.clone()), last);
    assert_eq!(entries[0].simulation_id.as_deref(), Some("run-9"));
}
