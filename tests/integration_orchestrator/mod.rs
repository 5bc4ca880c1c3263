use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::{json, Value};
use simlab::config::resilience::RetryPolicy;
use simlab::{HttpBackend, KvStore, MemoryStore, Orchestrator, OrchestratorOptions};

pub mod cancellation;
pub mod comparison;
pub mod end_to_end;
pub mod failures;
pub mod plots;

/// Short timers so runs finish in real time against the mock server.
pub fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay_ms: 20,
            max_delay_ms: 20,
            multiplier: 1.0,
        },
        artifact_poll_interval: Duration::from_millis(50),
        artifact_poll_attempts: 20,
        settle_delay: Duration::from_millis(10),
        poll_progress: false,
        ..OrchestratorOptions::default()
    }
}

pub fn orchestrator_with_store(server: &MockServer, store: Arc<dyn KvStore>) -> Orchestrator {
    let backend = HttpBackend::new(server.base_url()).expect("backend");
    Orchestrator::with_options(Arc::new(backend), store, fast_options())
}

pub fn orchestrator(server: &MockServer) -> Orchestrator {
    orchestrator_with_store(server, Arc::new(MemoryStore::new()))
}

pub fn raw_body(makespan: f64, energy_wh: f64) -> Value {
    json!({
        "simulationId": format!("sim-{makespan}"),
        "executionTimeMs": 1200,
        "summary": {
            "makespan": makespan,
            "averageResponseTime": makespan / 4.0,
            "resourceUtilization": 0.72,
            "imbalanceDegree": 0.18
        },
        "energyConsumption": { "totalEnergyWh": energy_wh },
        "vmUtilization": [{ "vmId": 0, "utilization": 0.7 }],
        "schedulingLog": [{ "cloudletId": 0, "vmId": 0 }]
    })
}

/// Mock the single-run endpoint for one algorithm.
pub async fn mock_raw<'a>(server: &'a MockServer, algorithm: &str, makespan: f64) -> httpmock::Mock<'a> {
    let body = raw_body(makespan, makespan * 10.0);
    let algorithm = algorithm.to_string();
    server
        .mock_async(move |when, then| {
            when.method(POST)
                .path("/api/simulate/raw")
                .json_body_partial(json!({ "optimizationAlgorithm": algorithm }).to_string());
            then.status(200).json_body(body);
        })
        .await
}
