//! Batch inference service client.
//!
//! Talks to an OpenAI-compatible batch API: upload a JSONL input file,
//! create a batch job over it, poll the job, download the output file.
//! The [`BatchService`] trait is the seam the orchestrator depends on;
//! tests substitute an in-process double.
//!
//! Retry strategy (transient errors only):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry with
//!   exponential backoff
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//!
//! # Environment Variables
//!
//! - `AZURE_OPENAI_API_KEY` — required; sent as the `api-key` header.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::BatchConfig;
use crate::models::JobStatus;

/// Provider-side view of one job.
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    pub output_file_id: Option<String>,
}

/// The external batch inference service.
#[async_trait]
pub trait BatchService: Send + Sync {
    /// Upload a JSONL input file; returns the provider file id.
    async fn upload_input(&self, jsonl: &str) -> Result<String>;

    /// Create a batch job over an uploaded file; returns the job id.
    async fn create_job(&self, input_file_id: &str, completion_window: &str) -> Result<String>;

    /// One status check for one job.
    async fn job_status(&self, job_id: &str) -> Result<JobState>;

    /// Download an output file's JSONL content.
    async fn download_output(&self, file_id: &str) -> Result<String>;
}

/// HTTP client for an OpenAI-compatible batch deployment.
pub struct OpenAiBatchClient {
    config: BatchConfig,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiBatchClient {
    pub fn new(config: BatchConfig) -> Result<Self> {
        let api_key = std::env::var("AZURE_OPENAI_API_KEY")
            .map_err(|_| anyhow!("AZURE_OPENAI_API_KEY not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/openai/{}?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            path,
            self.config.api_version
        )
    }

    /// Send a request with the retry policy. `build` constructs a fresh
    /// request per attempt (multipart bodies cannot be re-sent).
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = build().header("api-key", &self.api_key).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .context("Invalid JSON in batch API response");
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("Batch API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Batch API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Batch API request failed after retries")))
    }
}

#[async_trait]
impl BatchService for OpenAiBatchClient {
    async fn upload_input(&self, jsonl: &str) -> Result<String> {
        let url = self.url("files");
        let body = jsonl.to_string();
        let json = self
            .send_with_retry(|| {
                let form = reqwest::multipart::Form::new()
                    .text("purpose", "batch")
                    .part(
                        "file",
                        reqwest::multipart::Part::text(body.clone()).file_name("requests.jsonl"),
                    );
                self.client.post(&url).multipart(form)
            })
            .await?;

        json["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("File upload response missing 'id': {}", json))
    }

    async fn create_job(&self, input_file_id: &str, completion_window: &str) -> Result<String> {
        let url = self.url("batches");
        let body = serde_json::json!({
            "input_file_id": input_file_id,
            "endpoint": "/chat/completions",
            "completion_window": completion_window,
        });
        let json = self
            .send_with_retry(|| self.client.post(&url).json(&body))
            .await?;

        json["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Batch create response missing 'id': {}", json))
    }

    async fn job_status(&self, job_id: &str) -> Result<JobState> {
        let url = self.url(&format!("batches/{}", job_id));
        let json = self.send_with_retry(|| self.client.get(&url)).await?;

        let raw = json["status"]
            .as_str()
            .ok_or_else(|| anyhow!("Batch status response missing 'status': {}", json))?;
        let status = map_provider_status(raw)?;
        let output_file_id = json["output_file_id"].as_str().map(str::to_string);
        Ok(JobState {
            status,
            output_file_id,
        })
    }

    async fn download_output(&self, file_id: &str) -> Result<String> {
        let url = self.url(&format!("files/{}/content", file_id));
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .get(&url)
                .header("api-key", &self.api_key)
                .send()
                .await;

            match resp {
                Ok(response) if response.status().is_success() => {
                    return response
                        .text()
                        .await
                        .context("Failed to read output file content");
                }
                Ok(response) => {
                    let status = response.status();
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("Batch API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Batch API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Output download failed after retries")))
    }
}

/// Map the provider's status string to the local lifecycle.
///
/// `cancelling` is still in flight; an unknown status is an explicit
/// error rather than a guess, so a provider contract change surfaces
/// loudly.
pub fn map_provider_status(raw: &str) -> Result<JobStatus> {
    Ok(match raw {
        "validating" => JobStatus::Validating,
        "in_progress" => JobStatus::InProgress,
        "finalizing" | "cancelling" => JobStatus::Finalizing,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "expired" => JobStatus::Expired,
        "cancelled" => JobStatus::Cancelled,
        other => bail!("Unknown batch job status from provider: {:?}", other),
    })
}
