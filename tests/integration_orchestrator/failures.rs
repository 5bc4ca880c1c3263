//! Integration: rejected configurations and backend failures persist nothing.

use httpmock::prelude::*;
use serde_json::json;
use simlab::{RunConfiguration, RunEvent, RunOutcome, RunState, SimError};

use super::{mock_raw, orchestrator};

#[tokio::test]
async fn invalid_configuration_never_reaches_the_backend() {
    let server = MockServer::start_async().await;
    let raw = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/raw");
            then.status(200).json_body(json!({}));
        })
        .await;

    let orch = orchestrator(&server);
    let mut events = orch.subscribe();
    let mut config = RunConfiguration::default();
    config.data_center.num_hosts = 0;
    config.num_cloudlets = 0;

    let RunOutcome::Rejected(errors) = orch.start_run(config).await else {
        panic!("invalid configuration must be rejected");
    };
    assert!(errors.get("numHosts").is_some());
    assert!(errors.get("numCloudlets").is_some());
    assert_eq!(orch.current_state(), RunState::Config);
    raw.assert_hits_async(0).await;

    let event = events.try_recv().expect("validation event");
    assert!(matches!(event, RunEvent::ValidationFailed { .. }));
    assert!(event.is_error());
}

#[tokio::test]
async fn server_error_fails_the_run_without_touching_history() {
    let server = MockServer::start_async().await;
    let eaco = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/simulate/raw")
                .json_body_partial(r#"{"optimizationAlgorithm":"EACO"}"#);
            then.status(500).body("simulation engine crashed");
        })
        .await;
    let epso = mock_raw(&server, "EPSO", 50.0).await;

    let orch = orchestrator(&server);
    let mut events = orch.subscribe();
    let outcome = orch.start_run(RunConfiguration::default()).await;
    match outcome {
        RunOutcome::Failed(SimError::Http { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.contains("crashed"));
        }
        other => panic!("expected HTTP failure, got {other:?}"),
    }
    eaco.assert_hits_async(1).await;
    epso.assert_hits_async(0).await;

    assert_eq!(orch.current_state(), RunState::Config);
    assert!(orch.history_list().is_empty());
    assert!(orch.cache().is_empty());

    let mut failure = None;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::Failed { code, .. } = event {
            failure = Some(code);
        }
    }
    assert_eq!(failure.as_deref(), Some("E-SIM-0203"));
}

#[tokio::test]
async fn persistent_warm_up_gives_up_after_the_retry_ceiling() {
    let server = MockServer::start_async().await;
    let warming = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/raw");
            then.status(202).json_body(json!({ "status": "WARMING_UP" }));
        })
        .await;

    let orch = orchestrator(&server);
    let mut events = orch.subscribe();
    let outcome = orch.start_run(RunConfiguration::default()).await;
    assert!(matches!(outcome, RunOutcome::Failed(SimError::WarmingUp)));
    // First attempt plus three retries.
    warming.assert_hits_async(4).await;

    let mut warm_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, RunEvent::WarmingUp { .. }) {
            warm_events += 1;
        }
    }
    assert_eq!(warm_events, 3);
}
