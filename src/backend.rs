//! Simulator backend seam.
//!
//! The orchestrator only talks to [`SimulationBackend`]. [`HttpBackend`] is
//! the production implementation over the simulator's REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::config::settings::SimlabSettings;
use crate::config::timeouts::{HTTP_CONTROL_TIMEOUT_MS, HTTP_RUN_TIMEOUT_MS};
use crate::errors::{SimError, SimResult};
use crate::model::{Algorithm, PlotData, RunConfiguration, RunResult, WorkloadFile};
use crate::ttest::resolve;

/// Both sides of a comparison request plus its raw statistical test.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResponse {
    pub eaco: RunResult,
    pub epso: RunResult,
    pub statistical_test: Option<Value>,
}

/// An accepted asynchronous run. Metrics are available now; plots later.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncRun {
    pub tracking_id: String,
    pub result: RunResult,
}

/// Deferred artifacts for one tracking id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunArtifacts {
    pub simulation_id: Option<String>,
    pub plot_data: PlotData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactStatus {
    Pending,
    Complete(RunArtifacts),
    Failed(String),
}

/// Server-side progress, when the backend exposes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    #[serde(default, alias = "progress")]
    pub percent: Option<f64>,
    #[serde(default)]
    pub current_iteration: Option<u32>,
    #[serde(default)]
    pub total_iterations: Option<u32>,
    #[serde(default)]
    pub stage: Option<String>,
}

impl ProgressReport {
    /// Percent implied by the iteration counters, if both are known.
    pub fn iteration_percent(&self) -> Option<f64> {
        match (self.current_iteration, self.total_iterations) {
            (Some(current), Some(total)) if total > 0 => {
                Some((f64::from(current) / f64::from(total) * 100.0).min(100.0))
            }
            _ => None,
        }
    }
}

#[async_trait]
pub trait SimulationBackend: Send + Sync {
    /// One run of one algorithm (raw or uploaded workload).
    async fn run_single(&self, config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult>;

    /// `config.iterations` runs of one algorithm, averaged server-side.
    async fn run_iterative(&self, config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult>;

    /// Both algorithms plus a paired t-test.
    async fn run_comparison(&self, config: &RunConfiguration) -> SimResult<ComparisonResponse>;

    /// Synchronous run that also renders plots.
    async fn run_with_plots(&self, config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult>;

    /// Start a run whose plots are generated in the background.
    async fn run_async(&self, config: &RunConfiguration, algorithm: Algorithm) -> SimResult<AsyncRun>;

    async fn poll_artifact_status(&self, tracking_id: &str) -> SimResult<ArtifactStatus>;

    /// Ask the backend to stop whatever it is running.
    async fn cancel_run(&self) -> SimResult<()>;

    /// `Ok(None)` means the backend does not report progress.
    async fn poll_progress(&self) -> SimResult<Option<ProgressReport>> {
        Ok(None)
    }
}

// ----------------------------------------------------------------------------
// HTTP implementation
// ----------------------------------------------------------------------------

pub struct HttpBackend {
    client: Client,
    base: String,
}

impl HttpBackend {
    pub fn new(base: impl Into<String>) -> SimResult<Self> {
        let base = base.into();
        let parsed = Url::parse(&base)
            .map_err(|err| SimError::Config(format!("api base {base:?}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SimError::Config(format!(
                "api base {base:?}: unsupported scheme {}",
                parsed.scheme()
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(HTTP_RUN_TIMEOUT_MS))
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &SimlabSettings) -> SimResult<Self> {
        Self::new(settings.api_base.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post_json(&self, path: &str, body: &Map<String, Value>) -> SimResult<Response> {
        tracing::debug!(target = "simlab", path, "POST");
        Ok(self.client.post(self.url(path)).json(body).send().await?)
    }

    async fn post_multipart(
        &self,
        path: &str,
        params: &Map<String, Value>,
        file: &WorkloadFile,
    ) -> SimResult<Response> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| SimError::Run(format!("cannot read workload file {}: {e}", file.name)))?;
        let mut form = Form::new().part("file", Part::bytes(bytes).file_name(file.name.clone()));
        for (key, value) in params {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            form = form.text(key.clone(), text);
        }
        tracing::debug!(target = "simlab", path, file = %file.name, "POST multipart");
        Ok(self.client.post(self.url(path)).multipart(form).send().await?)
    }

    /// Plain or multipart depending on whether a workload file is attached.
    async fn post_run(
        &self,
        json_path: &str,
        file_path: &str,
        config: &RunConfiguration,
        algorithm: Option<Algorithm>,
    ) -> SimResult<Value> {
        let params = config.request_params(algorithm);
        let resp = match config.workload.file() {
            Some(file) => self.post_multipart(file_path, &params, file).await?,
            None => self.post_json(json_path, &params).await?,
        };
        read_json(resp, algorithm).await
    }
}

async fn read_json(resp: Response, algorithm: Option<Algorithm>) -> SimResult<Value> {
    let status = resp.status();
    if status == StatusCode::ACCEPTED {
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if is_warming_up(&body) {
            tracing::info!(target = "simlab", algorithm = ?algorithm, "backend warming up");
            return Err(SimError::WarmingUp);
        }
        return Ok(body);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SimError::Http {
            status: status.as_u16(),
            body,
        });
    }
    let text = resp.text().await?;
    Ok(serde_json::from_str(&text)?)
}

fn is_warming_up(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some("WARMING_UP")
}

fn artifacts_from(body: &Value) -> RunArtifacts {
    let mut plot_data: PlotData = body
        .get("plotData")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    // Root-level metadata carries the interpretations.
    if let Some(Value::Array(meta)) = body.get("plotMetadata") {
        plot_data.plot_metadata = meta.clone();
    }
    RunArtifacts {
        simulation_id: body
            .get("simulationId")
            .and_then(Value::as_str)
            .map(str::to_string),
        plot_data,
    }
}

#[async_trait]
impl SimulationBackend for HttpBackend {
    async fn run_single(&self, config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult> {
        let body = self
            .post_run("/api/simulate/raw", "/api/run-with-file", config, Some(algorithm))
            .await?;
        Ok(RunResult::from_response(algorithm, body))
    }

    async fn run_iterative(&self, config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult> {
        let body = self
            .post_run(
                "/api/run-iterations",
                "/api/run-iterations-with-file",
                config,
                Some(algorithm),
            )
            .await?;
        Ok(RunResult::from_response(algorithm, body))
    }

    async fn run_comparison(&self, config: &RunConfiguration) -> SimResult<ComparisonResponse> {
        let body = self
            .post_run("/api/compare", "/api/compare-with-file", config, None)
            .await?;
        let side = |key: &str| {
            body.get(key)
                .filter(|v| v.is_object())
                .cloned()
                .ok_or_else(|| SimError::Run(format!("comparison response is missing {key}")))
        };
        let eaco = side("eacoResults")?;
        let epso = side("epsoResults")?;
        let statistical_test =
            resolve(&body, &["tTestResults", "ttestResults", "statisticalTest"]).cloned();
        Ok(ComparisonResponse {
            eaco: RunResult::from_response(Algorithm::Eaco, eaco),
            epso: RunResult::from_response(Algorithm::Epso, epso),
            statistical_test,
        })
    }

    async fn run_with_plots(&self, config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult> {
        let params = config.request_params(Some(algorithm));
        let resp = self.post_json("/api/simulate/with-plots", &params).await?;
        let body = read_json(resp, Some(algorithm)).await?;
        Ok(RunResult::from_response(algorithm, body))
    }

    async fn run_async(&self, config: &RunConfiguration, algorithm: Algorithm) -> SimResult<AsyncRun> {
        let params = config.request_params(Some(algorithm));
        let resp = self.post_json("/api/simulate/async", &params).await?;
        let body = read_json(resp, Some(algorithm)).await?;
        let tracking_id = body
            .get("trackingId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SimError::Run(format!("async run for {algorithm} returned no tracking id")))?;
        let mut result = RunResult::from_response(algorithm, body);
        result.tracking_id = Some(tracking_id.clone());
        result.plots_generating = true;
        Ok(AsyncRun { tracking_id, result })
    }

    async fn poll_artifact_status(&self, tracking_id: &str) -> SimResult<ArtifactStatus> {
        let resp = self
            .client
            .get(self.url(&format!("/api/simulate/plot-results/{tracking_id}")))
            .timeout(Duration::from_millis(HTTP_CONTROL_TIMEOUT_MS))
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::ACCEPTED {
            return Ok(ArtifactStatus::Pending);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(ArtifactStatus::Failed(format!(
                "plot generation failed ({}): {body}",
                status.as_u16()
            )));
        }
        let body: Value = serde_json::from_str(&resp.text().await?)?;
        match body.get("status").and_then(Value::as_str) {
            Some("FAILED") | Some("ERROR") => {
                let message = body
                    .get("error")
                    .or_else(|| body.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("plot generation failed")
                    .to_string();
                Ok(ArtifactStatus::Failed(message))
            }
            _ => Ok(ArtifactStatus::Complete(artifacts_from(&body))),
        }
    }

    async fn cancel_run(&self) -> SimResult<()> {
        let mut last_error = None;
        let mut any_success = false;
        for path in ["/api/simulate/cancel", "/api/cancel"] {
            let sent = self
                .client
                .post(self.url(path))
                .timeout(Duration::from_millis(HTTP_CONTROL_TIMEOUT_MS))
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(target = "simlab", path, "cancel request accepted");
                    any_success = true;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    tracing::warn!(target = "simlab", path, status, "cancel request rejected");
                    last_error = Some(SimError::Http { status, body });
                }
                Err(err) => {
                    tracing::warn!(target = "simlab", path, error = %err, "cancel request failed");
                    last_error = Some(SimError::Transport(err));
                }
            }
        }
        if any_success {
            Ok(())
        } else {
            Err(last_error.unwrap_or_else(|| SimError::Run("all cancel endpoints failed".into())))
        }
    }

    async fn poll_progress(&self) -> SimResult<Option<ProgressReport>> {
        let resp = self
            .client
            .get(self.url("/api/simulate/progress"))
            .timeout(Duration::from_millis(HTTP_CONTROL_TIMEOUT_MS))
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::NOT_IMPLEMENTED => Ok(None),
            status if status.is_success() => {
                let report: ProgressReport = serde_json::from_str(&resp.text().await?)?;
                Ok(Some(report))
            }
            status => Err(SimError::Http {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}
