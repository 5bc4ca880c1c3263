//! Integration: comparison runs carry a normalized paired t-test on both sides.

use httpmock::prelude::*;
use serde_json::json;
use simlab::{RunConfiguration, RunOutcome};

use super::orchestrator;

#[tokio::test]
async fn comparison_run_normalizes_statistics() {
    let server = MockServer::start_async().await;
    let compare = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/compare")
                .json_body_partial(r#"{"iterations":30,"numHosts":20}"#);
            then.status(200).json_body(json!({
                "eacoResults": {
                    "totalIterations": 30,
                    "averageMetrics": { "makespan": 700.0, "averageResponseTime": 150.0 }
                },
                "epsoResults": {
                    "totalIterations": 30,
                    "averageMetrics": { "makespan": 760.0, "averageResponseTime": 171.5 }
                },
                "ttestResults": {
                    "metrics": {
                        "avgResponseTime": {
                            "p_value": "0.003 (two-tailed)",
                            "t": -3.2,
                            "df": 29,
                            "cohen_d": 0.9,
                            "significant": true,
                            "winnerAlgorithm": "EACO"
                        },
                        "completion_time": { "pValue": 0.41, "significant": false }
                    },
                    "winner": "EACO",
                    "num_significant": 1,
                    "n": 30
                }
            }));
        })
        .await;

    let orch = orchestrator(&server);
    let mut config = RunConfiguration::default();
    config.iterations = 30;
    let outcome = orch.start_run(config).await;
    assert!(matches!(outcome, RunOutcome::Completed { from_cache: false, .. }), "{outcome:?}");
    compare.assert_hits_async(1).await;

    let results = orch.current_results().expect("results");
    assert!(results.eaco.is_iteration_result);
    assert_eq!(results.eaco.summary.makespan, Some(700.0));
    assert_eq!(results.epso.summary.makespan, Some(760.0));

    let stats = results.eaco.t_test_results.clone().expect("statistics");
    assert_eq!(results.epso.t_test_results.as_ref(), Some(&stats));
    assert_eq!(stats.overall_winner, "EACO");
    assert_eq!(stats.significant_differences, 1);
    assert_eq!(stats.sample_size, Some(30));

    let response_time = &stats.metric_tests["responseTime"];
    assert_eq!(response_time.p_value, Some(0.003));
    assert_eq!(response_time.t_statistic, Some(-3.2));
    assert_eq!(response_time.degrees_of_freedom, Some(29.0));
    assert!(response_time.significant);
    assert_eq!(response_time.better_algorithm.as_deref(), Some("EACO"));

    let makespan = &stats.metric_tests["makespan"];
    assert_eq!(makespan.p_value, Some(0.41));
    assert!(!makespan.significant);

    // The history pair keeps the statistics with each side.
    let entries = orch.history_list();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.t_test_results.is_some()));
    assert!(entries.iter().all(|e| e.config.iterations == 30));
}

#[tokio::test]
async fn comparison_without_statistics_still_completes() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/compare");
            then.status(200).json_body(json!({
                "eacoResults": { "averageMetrics": { "makespan": 1.0 } },
                "epsoResults": { "averageMetrics": { "makespan": 2.0 } }
            }));
        })
        .await;

    let orch = orchestrator(&server);
    let mut config = RunConfiguration::default();
    config.iterations = 45;
    assert!(orch.start_run(config).await.is_completed());
    let results = orch.current_results().expect("results");
    assert!(results.eaco.t_test_results.is_none());
    assert!(results.epso.t_test_results.is_none());
}
