//! Integration: a single run end to end, then the same run served from cache.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use simlab::{
    HttpBackend, MemoryStore, Orchestrator, RunConfiguration, RunEvent, RunOutcome, RunState,
};

use super::{fast_options, mock_raw, orchestrator};

#[tokio::test]
async fn single_run_completes_and_records_history() {
    let server = MockServer::start_async().await;
    let eaco = mock_raw(&server, "EACO", 812.5).await;
    let epso = mock_raw(&server, "EPSO", 905.0).await;

    let orch = orchestrator(&server);
    let mut events = orch.subscribe();
    let config = RunConfiguration::default();
    assert_eq!(config.data_center.num_hosts, 20);
    assert_eq!(config.data_center.num_vms, 50);
    assert_eq!(config.num_cloudlets, 100);

    let outcome = orch.start_run(config).await;
    let RunOutcome::Completed { from_cache, history_id } = outcome else {
        panic!("run should complete, got {outcome:?}");
    };
    assert!(!from_cache);
    assert!(history_id.is_some());
    eaco.assert_hits_async(1).await;
    epso.assert_hits_async(1).await;

    assert_eq!(orch.current_state(), RunState::Animation);
    assert!(orch.show_results());
    assert_eq!(orch.current_state(), RunState::Results);

    let results = orch.current_results().expect("results");
    assert_eq!(results.eaco.summary.makespan, Some(812.5));
    assert_eq!(results.epso.summary.makespan, Some(905.0));
    assert_eq!(results.eaco.simulation_id.as_deref(), Some("sim-812.5"));
    assert_eq!(orch.progress().borrow().percent, 100.0);

    let history = orch.history_list();
    assert_eq!(history.len(), 2);
    let pair = orch
        .history_pair(history_id.as_deref().expect("id"))
        .expect("pair");
    assert_eq!(pair.eaco.summary.makespan, Some(812.5));
    assert_eq!(pair.epso.config.num_cloudlets, 100);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            simlab::events::EVENT_RUN_STARTED,
            simlab::events::EVENT_RUN_COMPLETED
        ]
    );
}

#[tokio::test]
async fn repeated_configuration_is_served_from_cache() {
    let server = MockServer::start_async().await;
    let eaco = mock_raw(&server, "EACO", 100.0).await;
    let epso = mock_raw(&server, "EPSO", 120.0).await;

    let orch = orchestrator(&server);
    assert!(orch.start_run(RunConfiguration::default()).await.is_completed());
    assert!(orch.new_run());
    assert_eq!(orch.current_state(), RunState::Config);
    assert!(orch.current_results().is_none());

    let mut events = orch.subscribe();
    let outcome = orch.start_run(RunConfiguration::default()).await;
    assert!(matches!(
        outcome,
        RunOutcome::Completed { from_cache: true, .. }
    ));
    eaco.assert_hits_async(1).await;
    epso.assert_hits_async(1).await;

    let results = orch.current_results().expect("results");
    assert_eq!(results.epso.summary.makespan, Some(120.0));
    // Cached runs are still recorded as their own history pair.
    assert_eq!(orch.history_list().len(), 4);

    let mut saw_hit = false;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::CacheHit { key, .. } = event {
            assert!(key.starts_with("sim_cache_v1_"));
            saw_hit = true;
        }
    }
    assert!(saw_hit);
}

#[tokio::test]
async fn changed_configuration_misses_the_cache() {
    let server = MockServer::start_async().await;
    let eaco = mock_raw(&server, "EACO", 100.0).await;
    let epso = mock_raw(&server, "EPSO", 120.0).await;

    let orch = orchestrator(&server);
    assert!(orch.start_run(RunConfiguration::default()).await.is_completed());
    let mut config = RunConfiguration::default();
    config.num_cloudlets = 150;
    let outcome = orch.start_run(config).await;
    assert!(matches!(
        outcome,
        RunOutcome::Completed { from_cache: false, .. }
    ));
    eaco.assert_hits_async(2).await;
    epso.assert_hits_async(2).await;
    assert_eq!(orch.cache().len(), 2);
}

#[tokio::test]
async fn warm_up_is_retried_until_the_backend_is_ready() {
    let server = MockServer::start_async().await;
    let mut warming = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/simulate/raw")
                .json_body_partial(r#"{"optimizationAlgorithm":"EACO"}"#);
            then.status(202).json_body(json!({ "status": "WARMING_UP" }));
        })
        .await;
    let epso = mock_raw(&server, "EPSO", 90.0).await;

    let mut options = fast_options();
    options.retry.base_delay_ms = 400;
    options.retry.max_delay_ms = 400;
    let backend = HttpBackend::new(server.base_url()).expect("backend");
    let orch = Orchestrator::with_options(Arc::new(backend), Arc::new(MemoryStore::new()), options);
    let handle = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start_run(RunConfiguration::default()).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    let warm_hits = warming.hits_async().await;
    assert!(warm_hits >= 1);
    warming.delete_async().await;
    let eaco = mock_raw(&server, "EACO", 80.0).await;

    let outcome = handle.await.expect("join");
    assert!(outcome.is_completed(), "{outcome:?}");
    eaco.assert_hits_async(1).await;
    epso.assert_hits_async(1).await;
    assert_eq!(
        orch.current_results().expect("results").eaco.summary.makespan,
        Some(80.0)
    );
}
