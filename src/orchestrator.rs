//! Batch job orchestration.
//!
//! Two entry points: [`Orchestrator::submit_batch`] turns a set of
//! request lines into one provider job, guarded so a project never has
//! two jobs in flight; [`Orchestrator::poll_tick`] advances every known
//! job by one status check and processes whatever reached a terminal
//! state.
//!
//! The tick is stateless: all knowledge of pending work is reconstructed
//! from `batch/*/info.json` in the store, so a crashed or skipped tick
//! loses nothing. A completed job whose processed marker is missing —
//! an orphan from an interrupted run — is picked up again on the next
//! tick and reprocessed; the marker write is conditional, so results are
//! recorded exactly once.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::batch_api::BatchService;
use crate::config::BatchConfig;
use crate::models::{BatchJobInfo, JobStatus};
use crate::notify::Notifier;
use crate::reconcile::{persist_results, reconcile_lines};
use crate::request::{to_jsonl, BatchRequestLine};
use crate::store::{keys, ObjectStore};

/// Content of the per-project submission guard key.
#[derive(Debug, Serialize, Deserialize)]
struct PendingGuard {
    project: String,
    /// Filled in once the provider has assigned a job id.
    job_id: Option<String>,
    acquired_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of a submission attempt.
#[derive(Debug)]
pub enum SubmitOutcome {
    Submitted(BatchJobInfo),
    /// A non-terminal job already exists for the project.
    AlreadyPending { job_id: Option<String> },
}

/// Counters from one poll tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub checked: usize,
    pub completed: usize,
    pub dead: usize,
    pub in_flight: usize,
    pub reprocessed: usize,
    pub errors: usize,
}

pub struct Orchestrator<'a> {
    pub store: &'a dyn ObjectStore,
    pub service: &'a dyn BatchService,
    pub notifier: &'a dyn Notifier,
    pub config: &'a BatchConfig,
}

impl<'a> Orchestrator<'a> {
    /// Submit one batch job for a project.
    ///
    /// The guard key is acquired with a conditional write before any
    /// provider call, so two concurrent submitters cannot both create a
    /// job. The loser learns the winner's job id from the guard content.
    pub async fn submit_batch(
        &self,
        project: &str,
        lines: &[BatchRequestLine],
    ) -> Result<SubmitOutcome> {
        if lines.is_empty() {
            bail!("No requests to submit for project '{}'", project);
        }

        let guard_key = keys::pending_guard(project);
        let guard = PendingGuard {
            project: project.to_string(),
            job_id: None,
            acquired_at: Utc::now(),
        };
        let acquired = self
            .store
            .put_if_absent(&guard_key, serde_json::to_vec_pretty(&guard)?.as_slice())
            .await?;
        if !acquired {
            let existing = self.store.get(&guard_key).await?;
            let job_id = existing
                .and_then(|data| serde_json::from_slice::<PendingGuard>(&data).ok())
                .and_then(|g| g.job_id);
            tracing::warn!(project, ?job_id, "Submission refused: job already pending");
            return Ok(SubmitOutcome::AlreadyPending { job_id });
        }

        match self.create_job(project, lines, &guard_key).await {
            Ok(info) => Ok(SubmitOutcome::Submitted(info)),
            Err(e) => {
                // The provider never saw a job; release the guard so the
                // project is not wedged.
                self.store.delete(&guard_key).await?;
                Err(e)
            }
        }
    }

    async fn create_job(
        &self,
        project: &str,
        lines: &[BatchRequestLine],
        guard_key: &str,
    ) -> Result<BatchJobInfo> {
        let jsonl = to_jsonl(lines)?;
        let input_file_id = self
            .service
            .upload_input(&jsonl)
            .await
            .context("Failed to upload batch input file")?;
        let job_id = self
            .service
            .create_job(&input_file_id, &self.config.completion_window())
            .await
            .context("Failed to create batch job")?;

        let now = Utc::now();
        let info = BatchJobInfo {
            job_id: job_id.clone(),
            project: project.to_string(),
            status: JobStatus::Submitted,
            input_file_id,
            output_file_id: None,
            total_requests: lines.len(),
            created_at: now,
            deadline: now + Duration::hours(self.config.completion_window_hours as i64),
        };

        self.store
            .put(&keys::batch_input(&job_id), jsonl.as_bytes())
            .await?;
        self.write_info(&info).await?;

        let guard = PendingGuard {
            project: project.to_string(),
            job_id: Some(job_id.clone()),
            acquired_at: now,
        };
        self.store
            .put(guard_key, serde_json::to_vec_pretty(&guard)?.as_slice())
            .await?;

        tracing::info!(project, job_id = %info.job_id, requests = lines.len(), "Batch job submitted");
        Ok(info)
    }

    /// One polling pass over every known job. Per-job failures are
    /// counted and logged, never fatal to the tick.
    pub async fn poll_tick(&self) -> Result<PollReport> {
        let mut report = PollReport::default();

        for info in self.job_infos(None).await? {
            report.checked += 1;
            match self.advance_job(info, &mut report).await {
                Ok(()) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::error!("Poll error: {:#}", e);
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            completed = report.completed,
            dead = report.dead,
            in_flight = report.in_flight,
            reprocessed = report.reprocessed,
            errors = report.errors,
            "Poll tick finished"
        );
        Ok(report)
    }

    async fn advance_job(&self, mut info: BatchJobInfo, report: &mut PollReport) -> Result<()> {
        if info.status.is_terminal() {
            // Orphan scan: terminal but never marked processed means an
            // earlier tick was interrupted mid-processing.
            if self
                .store
                .exists(&keys::processed_marker(&info.project, &info.job_id))
                .await?
            {
                return Ok(());
            }
            tracing::warn!(job_id = %info.job_id, "Orphaned terminal job, reprocessing");
            report.reprocessed += 1;
            if info.status == JobStatus::Completed {
                self.process_completed(&info).await?;
            } else {
                self.process_dead(&info).await?;
            }
            return Ok(());
        }

        let state = self
            .service
            .job_status(&info.job_id)
            .await
            .with_context(|| format!("Status check failed for job '{}'", info.job_id))?;

        if state.status != info.status || state.output_file_id != info.output_file_id {
            info.status = state.status;
            info.output_file_id = state.output_file_id;
            self.write_info(&info).await?;
        }

        match info.status {
            JobStatus::Completed => {
                self.process_completed(&info).await?;
                report.completed += 1;
            }
            s if s.is_dead() => {
                self.process_dead(&info).await?;
                report.dead += 1;
            }
            _ => {
                report.in_flight += 1;
                tracing::debug!(job_id = %info.job_id, status = %info.status, "Job in flight");
            }
        }
        Ok(())
    }

    async fn process_completed(&self, info: &BatchJobInfo) -> Result<()> {
        let output_file_id = info
            .output_file_id
            .as_deref()
            .ok_or_else(|| anyhow!("Completed job '{}' has no output file id", info.job_id))?;
        let content = self
            .service
            .download_output(output_file_id)
            .await
            .with_context(|| format!("Failed to download output for job '{}'", info.job_id))?;

        let outcome = reconcile_lines(&content);
        let created = persist_results(self.store, &info.project, &info.job_id, &outcome).await?;
        if created {
            tracing::info!(
                job_id = %info.job_id,
                records = outcome.record_count(),
                successful = outcome.successful,
                failed = outcome.failed,
                "Batch results reconciled"
            );
        } else {
            tracing::info!(job_id = %info.job_id, "Results already reconciled, skipping");
        }

        self.release_guard(info).await
    }

    /// A dead job produced no results. Notify once, record a zero-record
    /// marker so later ticks skip it, and release the project's guard.
    async fn process_dead(&self, info: &BatchJobInfo) -> Result<()> {
        self.notifier
            .critical(
                &info.project,
                &info.job_id,
                &format!("Batch job {} ended {} without results", info.job_id, info.status),
            )
            .await;

        let marker = crate::models::ProcessedMarker {
            batch_id: info.job_id.clone(),
            processed: true,
            processed_at: Utc::now(),
            records: 0,
        };
        self.store
            .put_if_absent(
                &keys::processed_marker(&info.project, &info.job_id),
                serde_json::to_vec_pretty(&marker)?.as_slice(),
            )
            .await?;

        self.release_guard(info).await
    }

    /// Release the project's submission guard if it still points at this
    /// job (a newer job's guard is left alone).
    async fn release_guard(&self, info: &BatchJobInfo) -> Result<()> {
        let guard_key = keys::pending_guard(&info.project);
        let Some(data) = self.store.get(&guard_key).await? else {
            return Ok(());
        };
        let guard: PendingGuard = match serde_json::from_slice(&data) {
            Ok(g) => g,
            Err(_) => return self.store.delete(&guard_key).await,
        };
        if guard.job_id.as_deref() == Some(info.job_id.as_str()) || guard.job_id.is_none() {
            self.store.delete(&guard_key).await?;
        }
        Ok(())
    }

    async fn write_info(&self, info: &BatchJobInfo) -> Result<()> {
        self.store
            .put(
                &keys::batch_info(&info.job_id),
                serde_json::to_vec_pretty(info)?.as_slice(),
            )
            .await
    }

    /// All known jobs, optionally restricted to one project, newest first.
    pub async fn job_infos(&self, project: Option<&str>) -> Result<Vec<BatchJobInfo>> {
        let mut infos = Vec::new();
        for key in self.store.list(keys::BATCH_PREFIX).await? {
            if !key.ends_with("/info.json") {
                continue;
            }
            let Some(data) = self.store.get(&key).await? else {
                continue;
            };
            let info: BatchJobInfo = serde_json::from_slice(&data)
                .with_context(|| format!("Corrupt job info at '{}'", key))?;
            if project.map_or(true, |p| p == info.project) {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(infos)
    }

    /// One job's persisted metadata.
    pub async fn job_info(&self, job_id: &str) -> Result<BatchJobInfo> {
        let data = self
            .store
            .get(&keys::batch_info(job_id))
            .await?
            .ok_or_else(|| anyhow!("Unknown job id: '{}'", job_id))?;
        serde_json::from_slice(&data).with_context(|| format!("Corrupt job info for '{}'", job_id))
    }
}
