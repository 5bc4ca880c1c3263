//! Integration: plot artifacts arrive after the metrics and are merged in place.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use simlab::{RunConfiguration, RunEvent, RunState};

use super::{orchestrator, raw_body};

#[tokio::test]
async fn async_plots_are_polled_and_merged() {
    let server = MockServer::start_async().await;
    for (algorithm, tracking) in [("EACO", "trk-eaco"), ("EPSO", "trk-epso")] {
        let mut body = raw_body(42.0, 420.0);
        body["trackingId"] = json!(tracking);
        server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/api/simulate/async")
                    .json_body_partial(json!({ "optimizationAlgorithm": algorithm }).to_string());
                then.status(200).json_body(body);
            })
            .await;
        server
            .mock_async(move |when, then| {
                when.method(GET)
                    .path(format!("/api/simulate/plot-results/{tracking}"));
                then.status(200).json_body(json!({
                    "status": "COMPLETED",
                    "simulationId": format!("sim-{tracking}"),
                    "plotData": { "plotPaths": [format!("/plots/{tracking}/gantt.png")] },
                    "plotMetadata": [{ "title": "Gantt", "interpretation": "balanced" }]
                }));
            })
            .await;
    }

    let orch = orchestrator(&server);
    let mut events = orch.subscribe();
    let mut config = RunConfiguration::default();
    config.enable_plots = true;

    assert!(orch.start_run(config).await.is_completed());
    assert_eq!(orch.current_state(), RunState::Animation);
    let first = orch.current_results().expect("results");
    assert!(first.plots_pending());
    assert_eq!(first.eaco.tracking_id.as_deref(), Some("trk-eaco"));

    let mut results = orch.results();
    tokio::time::timeout(
        Duration::from_secs(3),
        results.wait_for(|r| r.as_ref().is_some_and(|pair| !pair.plots_pending())),
    )
    .await
    .expect("artifacts merged in time")
    .expect("results channel open");

    let merged = orch.current_results().expect("results");
    let plots = merged.epso.plot_data.as_ref().expect("plots");
    assert_eq!(plots.plot_paths, vec!["/plots/trk-epso/gantt.png".to_string()]);
    assert_eq!(plots.plot_metadata.len(), 1);
    assert_eq!(merged.eaco.simulation_id.as_deref(), Some("sim-trk-eaco"));

    let mut ready = None;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::ArtifactsReady { ready: n, pending } = event {
            ready = Some((n, pending));
        }
    }
    assert_eq!(ready, Some((2, 0)));
}

#[tokio::test]
async fn missing_async_endpoint_falls_back_to_synchronous_plots() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/async");
            then.status(404);
        })
        .await;
    let sync = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/simulate/with-plots");
            then.status(200).json_body(json!({
                "simulationResults": { "summary": { "makespan": 9.0 } },
                "plotData": { "plotPaths": ["/plots/inline.png"] }
            }));
        })
        .await;

    let orch = orchestrator(&server);
    let mut config = RunConfiguration::default();
    config.enable_plots = true;
    assert!(orch.start_run(config).await.is_completed());
    sync.assert_hits_async(2).await;

    let results = orch.current_results().expect("results");
    assert!(!results.plots_pending());
    assert_eq!(results.eaco.summary.makespan, Some(9.0));
    assert_eq!(
        results.eaco.plot_data.as_ref().map(|p| p.plot_paths.len()),
        Some(1)
    );
}
