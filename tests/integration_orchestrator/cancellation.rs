//! Integration: cancelling an in-flight run tears it down and tells the backend.

use std::time::Duration;

use chrono::Utc;
use httpmock::prelude::*;
use simlab::{RunConfiguration, RunOutcome, RunState};

use super::{orchestrator, raw_body};

#[tokio::test]
async fn cancel_during_loading_returns_to_config() {
    let server = MockServer::start_async().await;
    let slow = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/raw");
            then.status(200)
                .delay(Duration::from_secs(5))
                .json_body(raw_body(10.0, 100.0));
        })
        .await;
    let cancel_primary = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/cancel");
            then.status(200);
        })
        .await;
    let cancel_legacy = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/cancel");
            then.status(404);
        })
        .await;

    let orch = orchestrator(&server);
    let mut state = orch.state();
    let run = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start_run(RunConfiguration::default()).await })
    };
    state
        .wait_for(|s| *s == RunState::Loading)
        .await
        .expect("loading");
    assert!(orch
        .resume_snapshot(Utc::now().timestamp_millis())
        .is_some());

    // Let the request reach the server before cancelling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(orch.cancel_run().await);

    let outcome = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run ends promptly after cancel")
        .expect("join");
    assert!(matches!(outcome, RunOutcome::Cancelled), "{outcome:?}");
    assert_eq!(orch.current_state(), RunState::Config);
    assert!(orch.current_results().is_none());
    assert!(orch.history_list().is_empty());
    assert!(orch.cache().is_empty());
    assert_eq!(orch.progress().borrow().percent, 0.0);
    assert!(orch
        .resume_snapshot(Utc::now().timestamp_millis())
        .is_none());

    assert_eq!(slow.hits_async().await, 1);
    cancel_primary.assert_hits_async(1).await;
    cancel_legacy.assert_hits_async(1).await;
}

#[tokio::test]
async fn cancel_without_a_run_is_a_no_op() {
    let server = MockServer::start_async().await;
    let cancel = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/cancel");
            then.status(200);
        })
        .await;
    let orch = orchestrator(&server);
    assert!(!orch.cancel_run().await);
    cancel.assert_hits_async(0).await;
    assert_eq!(orch.current_state(), RunState::Config);
}

#[tokio::test]
async fn a_second_start_while_loading_is_refused() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/raw");
            then.status(200)
                .delay(Duration::from_secs(5))
                .json_body(raw_body(10.0, 100.0));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/cancel");
            then.status(200);
        })
        .await;

    let orch = orchestrator(&server);
    let mut state = orch.state();
    let first = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start_run(RunConfiguration::default()).await })
    };
    state
        .wait_for(|s| *s == RunState::Loading)
        .await
        .expect("loading");

    let second = orch.start_run(RunConfiguration::default()).await;
    assert!(matches!(second, RunOutcome::Busy));

    assert!(orch.cancel_run().await);
    let outcome = first.await.expect("join");
    assert!(matches!(outcome, RunOutcome::Cancelled));
}
